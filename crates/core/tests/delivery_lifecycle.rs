//! Delivery lifecycle integration tests.
//!
//! These tests drive documents through the scheduler against a scripted
//! authority: created -> in progress -> (awaiting ticket) -> terminal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use courier_core::config::{NumberingConfig, SenderSection};
use courier_core::document::{DocumentStatus, DocumentStore, SqliteDocumentStore};
use courier_core::scheduler::{DeliveryScheduler, RetryPolicy, SchedulerConfig};
use courier_core::sender::{
    ConsultOutcome, DocumentSender, Failure, FailureKind, PollOutcome, SubmitOutcome,
    ALREADY_REGISTERED,
};
use courier_core::testing::{fixtures, MemoryBlobStore, MockSender, SenderCall};
use courier_core::{BlobStore, DeliveryService, Document, SqliteFiscalNumberStore, StrategyRegistry};

const RUC: &str = "20123456789";

/// Retries due immediately, so consecutive ticks exercise the whole path.
fn immediate_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 10,
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        jitter_ratio: 0.0,
    }
}

fn scheduler_config(retry: RetryPolicy) -> SchedulerConfig {
    SchedulerConfig {
        enabled: true,
        poll_interval_ms: 20,
        max_workers: 4,
        batch_size: 50,
        ticket_poll_delay_secs: 0,
        max_ticket_polls: 30,
        claim_lease_secs: 600,
        retry,
    }
}

/// Test helper to create all dependencies for delivery testing.
struct TestHarness {
    documents: Arc<SqliteDocumentStore>,
    blobs: MemoryBlobStore,
    sender: MockSender,
    service: DeliveryService,
    senders: SenderSection,
}

impl TestHarness {
    fn new() -> Self {
        let documents = Arc::new(SqliteDocumentStore::in_memory().expect("Failed to create store"));
        let numbers = Arc::new(SqliteFiscalNumberStore::in_memory().expect("Failed to create store"));
        let registry = StrategyRegistry::from_config(&NumberingConfig::default(), numbers)
            .expect("Failed to build registry");
        let blobs = MemoryBlobStore::new();
        let service = DeliveryService::new(
            registry,
            Arc::clone(&documents) as Arc<dyn DocumentStore>,
            Arc::new(blobs.clone()),
        );

        Self {
            documents,
            blobs,
            sender: MockSender::new(),
            service,
            senders: fixtures::config("http://authority.test").sender,
        }
    }

    fn scheduler(&self, config: SchedulerConfig) -> DeliveryScheduler {
        DeliveryScheduler::new(
            config,
            Arc::clone(&self.documents) as Arc<dyn DocumentStore>,
            Arc::new(self.blobs.clone()),
            Arc::new(self.sender.clone()) as Arc<dyn DocumentSender>,
            self.senders.clone(),
        )
    }

    async fn enqueue_invoice(&self, id: &str) -> Document {
        let xml = fixtures::invoice_xml(RUC, id);
        self.service
            .enqueue("acme", xml.as_bytes())
            .await
            .expect("Failed to enqueue invoice")
    }

    async fn enqueue_summary(&self, id: &str) -> Document {
        let xml = fixtures::summary_xml(RUC, id);
        self.service
            .enqueue("acme", xml.as_bytes())
            .await
            .expect("Failed to enqueue summary")
    }

    fn reload(&self, document: &Document) -> Document {
        self.documents
            .get(&document.id)
            .expect("Failed to read document")
            .expect("Document disappeared")
    }

    async fn wait_for_status(
        &self,
        document: &Document,
        expected: DocumentStatus,
        timeout: Duration,
    ) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.reload(document).status == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

#[tokio::test]
async fn test_invoice_accepted_with_receipt() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    let document = harness.enqueue_invoice("F001-1").await;

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.accepted, 1);

    let document = harness.reload(&document);
    assert_eq!(document.status, DocumentStatus::Accepted);
    assert_eq!(document.retries, 0);
    assert!(document.claimed_by.is_none());

    let receipt = harness.service.fetch_receipt(&document.id).await.unwrap();
    assert!(receipt.is_some());
}

#[tokio::test]
async fn test_batch_document_ticket_pending_then_accepted() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    harness
        .sender
        .push_submit(SubmitOutcome::Ticket("T-1".to_string()))
        .await;
    harness.sender.push_poll(PollOutcome::Pending).await;
    harness
        .sender
        .push_poll(PollOutcome::Accepted(fixtures::receipt("20123456789-RC-20240116-1")))
        .await;
    let document = harness.enqueue_summary("RC-20240116-1").await;

    scheduler.run_once().await.unwrap();
    let after_submit = harness.reload(&document);
    assert_eq!(after_submit.status, DocumentStatus::SentAwaitingTicket);
    assert_eq!(after_submit.ticket.as_deref(), Some("T-1"));

    scheduler.run_once().await.unwrap();
    let after_pending = harness.reload(&document);
    assert_eq!(after_pending.status, DocumentStatus::SentAwaitingTicket);
    assert_eq!(after_pending.ticket_polls, 1);
    assert_eq!(after_pending.retries, 0);

    scheduler.run_once().await.unwrap();
    let accepted = harness.reload(&document);
    assert_eq!(accepted.status, DocumentStatus::Accepted);
    let cdr_ref = accepted.cdr_ref.expect("receipt not stored");
    assert!(!harness.blobs.fetch(&cdr_ref).await.unwrap().is_empty());

    assert_eq!(harness.sender.calls_of(SenderCall::Submit).await.len(), 1);
    let polls = harness.sender.calls_of(SenderCall::Poll).await;
    assert_eq!(polls.len(), 2);
    assert!(polls.iter().all(|c| c.ticket.as_deref() == Some("T-1")));
}

#[tokio::test]
async fn test_timeout_schedules_backoff() {
    let harness = TestHarness::new();
    let retry = RetryPolicy::default();
    let scheduler = harness.scheduler(scheduler_config(retry.clone()));
    harness
        .sender
        .push_submit(SubmitOutcome::Retryable(Failure::ambiguous(
            FailureKind::Timeout,
            "no response within 30s",
        )))
        .await;
    let document = harness.enqueue_invoice("F001-2").await;

    let before = Utc::now();
    scheduler.run_once().await.unwrap();
    let after = Utc::now();

    let document = harness.reload(&document);
    assert_eq!(document.status, DocumentStatus::ScheduledRetry);
    assert_eq!(document.retries, 1);
    assert!(document.ambiguous);
    assert!(document.last_error.as_deref().unwrap().starts_with("timeout"));

    let delay = chrono::Duration::from_std(retry.delay(1, &document.id)).unwrap();
    let scheduled_at = document.scheduled_at.expect("retry not scheduled");
    assert!(scheduled_at >= before + delay - chrono::Duration::milliseconds(1));
    assert!(scheduled_at <= after + delay);

    // Not due yet: the next tick leaves it alone.
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.due, 0);
    assert_eq!(harness.sender.calls().await.len(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_become_error() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    for _ in 0..10 {
        harness
            .sender
            .push_submit(SubmitOutcome::Retryable(Failure::new(
                FailureKind::Connectivity,
                "connection refused",
            )))
            .await;
    }
    let document = harness.enqueue_invoice("F001-3").await;

    for attempt in 1..=9 {
        scheduler.run_once().await.unwrap();
        let current = harness.reload(&document);
        assert_eq!(current.status, DocumentStatus::ScheduledRetry);
        assert_eq!(current.retries, attempt);
    }

    scheduler.run_once().await.unwrap();
    let failed = harness.reload(&document);
    assert_eq!(failed.status, DocumentStatus::Error);
    assert_eq!(failed.retries, 10);
    assert!(failed.scheduled_at.is_none());
    assert!(failed
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("max retries exceeded (10)"));

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.due, 0);
    assert_eq!(harness.sender.calls_of(SenderCall::Submit).await.len(), 10);
}

#[tokio::test]
async fn test_rejection_is_terminal() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    let message = "El numero de RUC del receptor no existe";
    harness
        .sender
        .push_submit(SubmitOutcome::Rejected(fixtures::rejection(
            "20123456789-01-F001-4",
            2017,
            message,
        )))
        .await;
    let document = harness.enqueue_invoice("F001-4").await;

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.rejected, 1);

    let document = harness.reload(&document);
    assert_eq!(document.status, DocumentStatus::Rejected);
    assert_eq!(document.retries, 0);
    assert_eq!(document.last_error.as_deref(), Some(message));
    assert!(document.cdr_ref.is_some());

    scheduler.run_once().await.unwrap();
    assert_eq!(harness.sender.calls().await.len(), 1);
}

#[tokio::test]
async fn test_ambiguous_attempt_recovered_by_consultation() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    harness
        .sender
        .push_submit(SubmitOutcome::Retryable(Failure::ambiguous(
            FailureKind::Timeout,
            "no response",
        )))
        .await;
    harness
        .sender
        .push_consult(ConsultOutcome::Accepted(fixtures::receipt("20123456789-01-F001-5")))
        .await;
    let document = harness.enqueue_invoice("F001-5").await;

    scheduler.run_once().await.unwrap();
    scheduler.run_once().await.unwrap();

    let document = harness.reload(&document);
    assert_eq!(document.status, DocumentStatus::Accepted);
    assert!(!document.ambiguous);
    assert!(document.cdr_ref.is_some());
    assert_eq!(harness.sender.calls_of(SenderCall::Submit).await.len(), 1);
    assert_eq!(harness.sender.calls_of(SenderCall::Consult).await.len(), 1);
}

#[tokio::test]
async fn test_ambiguous_attempt_not_found_is_resubmitted() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    harness
        .sender
        .push_submit(SubmitOutcome::Retryable(Failure::ambiguous(
            FailureKind::Timeout,
            "no response",
        )))
        .await;
    harness.sender.push_consult(ConsultOutcome::NotFound).await;
    let document = harness.enqueue_invoice("F001-6").await;

    scheduler.run_once().await.unwrap();
    scheduler.run_once().await.unwrap();

    let document = harness.reload(&document);
    assert_eq!(document.status, DocumentStatus::Accepted);
    let calls: Vec<SenderCall> = harness.sender.calls().await.iter().map(|c| c.call).collect();
    assert_eq!(
        calls,
        vec![SenderCall::Submit, SenderCall::Consult, SenderCall::Submit]
    );
}

#[tokio::test]
async fn test_already_registered_after_ambiguous_attempt_needs_operator() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    harness
        .sender
        .push_submit(SubmitOutcome::Retryable(Failure::ambiguous(
            FailureKind::Timeout,
            "no response",
        )))
        .await;
    harness
        .sender
        .push_submit(SubmitOutcome::Rejected(courier_core::sender::Rejection {
            code: ALREADY_REGISTERED,
            message: "El comprobante fue registrado previamente con otros datos".to_string(),
            cdr: None,
        }))
        .await;
    let document = harness.enqueue_invoice("F001-7").await;

    scheduler.run_once().await.unwrap();
    scheduler.run_once().await.unwrap();

    let document = harness.reload(&document);
    assert_eq!(document.status, DocumentStatus::Error);
    assert!(document.last_error.as_deref().unwrap().contains("already registered"));
}

#[tokio::test]
async fn test_ticket_is_polled_again_after_ambiguous_poll() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    harness
        .sender
        .push_submit(SubmitOutcome::Ticket("T-9".to_string()))
        .await;
    harness
        .sender
        .push_poll(PollOutcome::Retryable(Failure::ambiguous(
            FailureKind::Timeout,
            "no response",
        )))
        .await;
    let document = harness.enqueue_summary("RC-20240116-2").await;

    scheduler.run_once().await.unwrap();
    scheduler.run_once().await.unwrap();
    let retrying = harness.reload(&document);
    assert_eq!(retrying.status, DocumentStatus::ScheduledRetry);
    assert_eq!(retrying.ticket.as_deref(), Some("T-9"));

    scheduler.run_once().await.unwrap();
    let document = harness.reload(&document);
    assert_eq!(document.status, DocumentStatus::Accepted);
    assert_eq!(harness.sender.calls_of(SenderCall::Submit).await.len(), 1);
    assert_eq!(harness.sender.calls_of(SenderCall::Poll).await.len(), 2);
    assert!(harness.sender.calls_of(SenderCall::Consult).await.is_empty());
}

#[tokio::test]
async fn test_fatal_failure_then_operator_retry() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    harness
        .sender
        .push_submit(SubmitOutcome::Fatal("credentials refused (0102)".to_string()))
        .await;
    let document = harness.enqueue_invoice("F001-8").await;

    scheduler.run_once().await.unwrap();
    let failed = harness.reload(&document);
    assert_eq!(failed.status, DocumentStatus::Error);
    assert_eq!(failed.last_error.as_deref(), Some("credentials refused (0102)"));

    let reset = harness.service.retry_document(&document.id).unwrap();
    assert_eq!(reset.status, DocumentStatus::ScheduledRetry);
    assert_eq!(reset.retries, 0);
    assert!(reset.last_error.is_none());

    scheduler.run_once().await.unwrap();
    assert_eq!(harness.reload(&document).status, DocumentStatus::Accepted);
}

#[tokio::test]
async fn test_receipt_storage_failure_is_retried() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    let document = harness.enqueue_invoice("F001-9").await;
    harness.blobs.fail_next_stores(1);
    harness
        .sender
        .push_consult(ConsultOutcome::Accepted(fixtures::receipt("20123456789-01-F001-9")))
        .await;

    scheduler.run_once().await.unwrap();
    let retrying = harness.reload(&document);
    assert_eq!(retrying.status, DocumentStatus::ScheduledRetry);
    assert!(retrying.ambiguous);
    assert!(retrying.cdr_ref.is_none());

    scheduler.run_once().await.unwrap();
    let document = harness.reload(&document);
    assert_eq!(document.status, DocumentStatus::Accepted);
    assert!(document.cdr_ref.is_some());
    assert_eq!(harness.sender.calls_of(SenderCall::Submit).await.len(), 1);
}

#[tokio::test]
async fn test_recover_releases_abandoned_claims() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(SchedulerConfig {
        claim_lease_secs: 1,
        ..scheduler_config(immediate_retry())
    });
    harness
        .sender
        .push_submit(SubmitOutcome::Ticket("T-3".to_string()))
        .await;

    let summary = harness.enqueue_summary("RC-20240116-3").await;
    scheduler.run_once().await.unwrap();
    let invoice = harness.enqueue_invoice("F001-10").await;
    let fresh = harness.enqueue_invoice("F001-13").await;

    // A previous process claimed both and died.
    let now = Utc::now();
    assert!(harness.documents.claim(&invoice.id, "dead:1", now).unwrap().is_some());
    assert!(harness.documents.claim(&summary.id, "dead:2", now).unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // A live worker claimed this one just now.
    assert!(harness
        .documents
        .claim(&fresh.id, "live:1", Utc::now())
        .unwrap()
        .is_some());

    let recovered = scheduler.recover(Utc::now()).unwrap();
    assert_eq!(recovered, 2);

    let invoice = harness.reload(&invoice);
    assert_eq!(invoice.status, DocumentStatus::ScheduledRetry);
    assert!(invoice.ambiguous);
    assert_eq!(invoice.retries, 1);
    assert!(invoice.claimed_by.is_none());

    let summary = harness.reload(&summary);
    assert_eq!(summary.status, DocumentStatus::SentAwaitingTicket);
    assert_eq!(summary.ticket.as_deref(), Some("T-3"));
    assert!(summary.claimed_by.is_none());

    let fresh = harness.reload(&fresh);
    assert_eq!(fresh.status, DocumentStatus::InProgress);
    assert_eq!(fresh.claimed_by.as_deref(), Some("live:1"));

    scheduler.run_once().await.unwrap();
    assert_eq!(harness.reload(&invoice).status, DocumentStatus::Accepted);
    assert_eq!(harness.reload(&summary).status, DocumentStatus::Accepted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recovery_leaves_in_flight_submission_alone() {
    let harness = TestHarness::new();
    harness.sender.set_latency(Duration::from_millis(500)).await;
    let first = Arc::new(harness.scheduler(scheduler_config(immediate_retry())));
    let second = harness.scheduler(scheduler_config(immediate_retry()));
    let document = harness.enqueue_invoice("F001-14").await;

    let in_flight = {
        let first = Arc::clone(&first);
        tokio::spawn(async move { first.run_once().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.reload(&document).status, DocumentStatus::InProgress);

    // A second scheduler starting up while the first is mid-submit.
    let recovered = second.recover(Utc::now()).unwrap();
    assert_eq!(recovered, 0);
    let report = second.run_once().await.unwrap();
    assert_eq!(report.claimed, 0);

    let report = in_flight.await.unwrap().unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.accepted, 1);

    assert_eq!(harness.sender.calls_of(SenderCall::Submit).await.len(), 1);
    assert_eq!(harness.sender.overlapping_calls(), 0);
    let document = harness.reload(&document);
    assert_eq!(document.status, DocumentStatus::Accepted);
    assert!(document.cdr_ref.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_schedulers_never_double_submit() {
    let harness = TestHarness::new();
    harness.sender.set_latency(Duration::from_millis(30)).await;
    let first = harness.scheduler(scheduler_config(immediate_retry()));
    let second = harness.scheduler(scheduler_config(immediate_retry()));

    let mut documents = Vec::new();
    for n in 1..=20 {
        documents.push(harness.enqueue_invoice(&format!("F001-{}", n)).await);
    }

    let (a, b) = tokio::join!(first.run_once(), second.run_once());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.claimed + b.claimed, 20);

    let submits = harness.sender.calls_of(SenderCall::Submit).await;
    assert_eq!(submits.len(), 20);
    assert_eq!(harness.sender.overlapping_calls(), 0);

    let mut per_document: HashMap<String, usize> = HashMap::new();
    for call in submits {
        *per_document.entry(call.document_id).or_default() += 1;
    }
    assert!(per_document.values().all(|&n| n == 1));

    for document in &documents {
        assert_eq!(harness.reload(document).status, DocumentStatus::Accepted);
    }
}

#[tokio::test]
async fn test_start_stop_lifecycle() {
    let harness = TestHarness::new();
    let scheduler = harness.scheduler(scheduler_config(immediate_retry()));
    let document = harness.enqueue_invoice("F001-11").await;

    scheduler.start().await;
    assert!(scheduler.is_running());

    let accepted = harness
        .wait_for_status(&document, DocumentStatus::Accepted, Duration::from_secs(5))
        .await;
    assert!(accepted, "document was not delivered");

    let status = scheduler.status();
    assert!(status.running);
    assert_eq!(status.documents.get("accepted"), Some(&1));

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.status().in_flight, 0);
}

#[tokio::test]
async fn test_disabled_scheduler_does_not_start() {
    let harness = TestHarness::new();
    let config = SchedulerConfig {
        enabled: false,
        ..scheduler_config(immediate_retry())
    };
    let scheduler = harness.scheduler(config);
    let document = harness.enqueue_invoice("F001-12").await;

    scheduler.start().await;
    assert!(!scheduler.is_running());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.reload(&document).status, DocumentStatus::Created);
}
