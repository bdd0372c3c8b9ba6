//! Delivery scheduler implementation.
//!
//! A single loop wakes every `poll_interval_ms`, lists due documents and
//! dispatches each one to a bounded pool of workers. A worker only touches a
//! document after winning the atomic claim, so no document is ever in flight
//! twice. Shutdown is observed between ticks; a tick always waits for its
//! workers, so a submission is never cancelled halfway. Claims older than
//! the configured lease are presumed abandoned and released on each tick.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SenderSection;
use crate::document::{
    transition, DocumentError, DocumentFilter, DocumentStatus, DocumentStore, DocumentUpdate,
    Outcome, TransitionPolicy,
};
use crate::metrics;
use crate::sender::{DocumentSender, Failure, FailureKind};
use crate::storage::BlobStore;

use super::config::SchedulerConfig;
use super::recorder::ResultRecorder;
use super::types::{SchedulerError, SchedulerStatus, TickReport};
use super::worker::Worker;

const RECOVERY_BATCH: i64 = 100;

/// State shared between the scheduler handle and its loop.
struct Shared {
    config: SchedulerConfig,
    documents: Arc<dyn DocumentStore>,
    worker: Worker,
    instance_id: String,
    slots: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight gauge when a worker task ends, even on panic.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drives documents through delivery until they reach a terminal status.
pub struct DeliveryScheduler {
    shared: Arc<Shared>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryScheduler {
    /// Create a new scheduler.
    pub fn new(
        config: SchedulerConfig,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        sender: Arc<dyn DocumentSender>,
        senders: SenderSection,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let recorder = ResultRecorder::new(
            Arc::clone(&documents),
            Arc::clone(&blobs),
            TransitionPolicy::from_config(&config),
        );
        let worker = Worker {
            blobs,
            sender,
            senders: Arc::new(senders),
            recorder: Arc::new(recorder),
        };
        let slots = Arc::new(Semaphore::new(config.max_workers.max(1)));

        Self {
            shared: Arc::new(Shared {
                config,
                documents,
                worker,
                instance_id: Uuid::new_v4().simple().to_string(),
                slots,
                in_flight: Arc::new(AtomicUsize::new(0)),
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    /// Identifier prefixed to every claim token this scheduler issues.
    pub fn instance_id(&self) -> &str {
        &self.shared.instance_id
    }

    /// Start the scheduler (spawns the delivery loop).
    ///
    /// Claims left behind by a previous process are released first.
    pub async fn start(&self) {
        if !self.shared.config.enabled {
            info!("Delivery scheduler disabled");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        info!(
            instance = %self.shared.instance_id,
            max_workers = self.shared.config.max_workers,
            "Starting delivery scheduler"
        );

        match self.recover(Utc::now()) {
            Ok(0) => {}
            Ok(n) => info!("Recovered {} abandoned documents", n),
            Err(e) => error!("Failed to recover abandoned documents: {}", e),
        }

        let handle = self.spawn_delivery_loop();
        *self.loop_handle.lock().await = Some(handle);

        info!("Delivery scheduler started");
    }

    /// Stop the scheduler gracefully, waiting for the current tick to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }

        info!("Stopping delivery scheduler");

        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Delivery loop ended abnormally: {}", e);
            }
        }

        info!("Delivery scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Get current scheduler status.
    pub fn status(&self) -> SchedulerStatus {
        let documents: BTreeMap<String, i64> = DocumentStatus::ALL
            .into_iter()
            .map(|status| {
                let count = self
                    .shared
                    .documents
                    .count(&DocumentFilter::new().with_status(status))
                    .unwrap_or(0);
                (status.as_str().to_string(), count)
            })
            .collect();

        SchedulerStatus {
            running: self.is_running(),
            in_flight: self.shared.in_flight.load(Ordering::SeqCst),
            max_workers: self.shared.config.max_workers,
            documents,
        }
    }

    /// Run a single tick immediately, independent of the loop.
    pub async fn run_once(&self) -> Result<TickReport, SchedulerError> {
        Self::tick(&self.shared).await
    }

    /// Release claims abandoned by a worker that stopped mid-delivery.
    ///
    /// Only claims taken `claim_lease_secs` or more before `now` are
    /// touched. A younger claim may belong to a live worker, here or in
    /// another scheduler sharing the store, whose call is still in flight.
    ///
    /// An interrupted submission may have reached the authority, so it is
    /// recorded as an ambiguous retryable failure. Ticket polls are idempotent
    /// and simply become due again. Returns the number of documents released.
    pub fn recover(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        Self::release_stale_claims(&self.shared, now)
    }

    fn release_stale_claims(
        shared: &Shared,
        now: DateTime<Utc>,
    ) -> Result<usize, SchedulerError> {
        let cutoff = now - chrono::Duration::seconds(shared.config.claim_lease_secs as i64);

        let policy = shared.worker.recorder.policy();
        let filter = DocumentFilter::new()
            .with_claimed_before(cutoff)
            .with_limit(RECOVERY_BATCH);
        let mut recovered = 0;

        loop {
            let stale = shared.documents.list(&filter)?;
            if stale.is_empty() {
                break;
            }
            let mut progressed = false;

            for document in stale {
                let Some(token) = document.claimed_by.clone() else {
                    continue;
                };

                let update = if document.status == DocumentStatus::InProgress {
                    let failure = Failure::ambiguous(
                        FailureKind::Interrupted,
                        "delivery interrupted before its outcome was recorded",
                    );
                    transition::apply(&document, Outcome::Retryable(failure), policy, now)?.update
                } else {
                    DocumentUpdate {
                        status: document.status,
                        retries: document.retries,
                        last_error: document.last_error.clone(),
                        ticket: document.ticket.clone(),
                        scheduled_at: document.scheduled_at,
                        cdr_ref: document.cdr_ref.clone(),
                        ticket_polls: document.ticket_polls,
                        ambiguous: document.ambiguous,
                    }
                };

                match shared.documents.release(&document.id, &token, &update) {
                    Ok(released) => {
                        warn!(
                            document_id = %released.id,
                            status = %released.status,
                            claimed_by = %token,
                            "Released abandoned claim"
                        );
                        recovered += 1;
                        progressed = true;
                    }
                    Err(DocumentError::ClaimLost(_)) => {
                        debug!(document_id = %document.id, "Claim changed during recovery");
                        progressed = true;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if !progressed {
                break;
            }
        }

        Ok(recovered)
    }

    /// Spawn the delivery loop task.
    fn spawn_delivery_loop(&self) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Delivery loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Delivery loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(shared.config.poll_interval()) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        match Self::release_stale_claims(&shared, Utc::now()) {
                            Ok(0) => {}
                            Ok(n) => info!("Recovered {} abandoned documents", n),
                            Err(e) => warn!("Claim recovery failed: {}", e),
                        }
                        match Self::tick(&shared).await {
                            Ok(report) if report.claimed > 0 => debug!(?report, "Tick finished"),
                            Ok(_) => {}
                            Err(e) => warn!("Delivery tick failed: {}", e),
                        }
                    }
                }
            }
            info!("Delivery loop stopped");
        })
    }

    /// Claim due documents and deliver them, waiting for every worker.
    async fn tick(shared: &Arc<Shared>) -> Result<TickReport, SchedulerError> {
        let due = shared
            .documents
            .due(Utc::now(), shared.config.batch_size as i64)?;
        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let mut tasks = JoinSet::new();
        for document in due {
            let permit = match Arc::clone(&shared.slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("Worker pool closed, abandoning the rest of the tick");
                    break;
                }
            };

            let token = format!("{}:{}", shared.instance_id, Uuid::new_v4().simple());
            let claimed = match shared.documents.claim(&document.id, &token, Utc::now()) {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    debug!(document_id = %document.id, "Document claimed elsewhere");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(document_id = %document.id, "Failed to claim document: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            metrics::DOCUMENTS_CLAIMED.inc();
            report.claimed += 1;

            let worker = shared.worker.clone();
            let in_flight = InFlight::enter(&shared.in_flight);
            tasks.spawn(async move {
                let _permit = permit;
                let _in_flight = in_flight;
                worker.deliver(claimed, &token).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(document)) => report.record(document.status),
                Ok(Err(e)) => {
                    warn!("Delivery outcome not recorded: {}", e);
                    report.failed += 1;
                }
                Err(e) => {
                    error!("Delivery task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
