//! Applies attempt outcomes to documents.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::document::{
    transition, Document, DocumentError, DocumentStatus, DocumentStore, Outcome, TransitionPolicy,
};
use crate::metrics;
use crate::sender::{Failure, FailureKind};
use crate::storage::BlobStore;

use super::SchedulerError;

/// Records the outcome of a delivery attempt on its document.
///
/// The receipt is written to blob storage first and the document row is
/// updated second, in one conditional write that also drops the claim. If the
/// receipt cannot be stored the attempt is recorded as an ambiguous retryable
/// failure instead, so a terminal status is never persisted without its
/// receipt.
pub struct ResultRecorder {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    policy: TransitionPolicy,
}

impl ResultRecorder {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        policy: TransitionPolicy,
    ) -> Self {
        Self {
            documents,
            blobs,
            policy,
        }
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    /// Record `outcome` for a document claimed with `claim_token`.
    pub async fn record(
        &self,
        document: &Document,
        claim_token: &str,
        outcome: Outcome,
    ) -> Result<Document, SchedulerError> {
        let now = Utc::now();
        let mut transition = transition::apply(document, outcome, &self.policy, now)?;

        if let Some(receipt) = transition.receipt.take() {
            match self.blobs.store(&receipt).await {
                Ok(reference) => transition.update.cdr_ref = Some(reference),
                Err(e) => {
                    warn!(
                        document_id = %document.id,
                        error = %e,
                        "Failed to store receipt, scheduling re-query"
                    );
                    let failure = Failure::ambiguous(
                        FailureKind::Storage,
                        format!("receipt could not be stored: {}", e),
                    );
                    transition =
                        transition::apply(document, Outcome::Retryable(failure), &self.policy, now)?;
                }
            }
        }

        let updated = match self
            .documents
            .release(&document.id, claim_token, &transition.update)
        {
            Ok(updated) => updated,
            Err(e) => {
                if matches!(e, DocumentError::ClaimLost(_)) {
                    metrics::CLAIMS_LOST.inc();
                }
                let cdr_ref = transition.update.cdr_ref.clone().filter(|stored| {
                    document.cdr_ref.as_deref() != Some(stored.as_str())
                });
                error!(
                    document_id = %document.id,
                    status = %transition.update.status,
                    cdr_ref = cdr_ref.as_deref().unwrap_or_default(),
                    error = %e,
                    "Failed to record delivery outcome"
                );
                return Err(SchedulerError::Unrecorded {
                    document_id: document.id.clone(),
                    status: transition.update.status,
                    cdr_ref,
                    source: e,
                });
            }
        };

        metrics::DOCUMENT_TRANSITIONS
            .with_label_values(&[updated.status.as_str()])
            .inc();

        match updated.status {
            DocumentStatus::Accepted => info!(document_id = %updated.id, "Document accepted"),
            DocumentStatus::Rejected => info!(
                document_id = %updated.id,
                reason = updated.last_error.as_deref().unwrap_or_default(),
                "Document rejected"
            ),
            DocumentStatus::SentAwaitingTicket => info!(
                document_id = %updated.id,
                ticket = updated.ticket.as_deref().unwrap_or_default(),
                polls = updated.ticket_polls,
                "Awaiting ticket decision"
            ),
            DocumentStatus::ScheduledRetry => warn!(
                document_id = %updated.id,
                retries = updated.retries,
                error = updated.last_error.as_deref().unwrap_or_default(),
                "Delivery failed, retry scheduled"
            ),
            DocumentStatus::Error => error!(
                document_id = %updated.id,
                retries = updated.retries,
                error = updated.last_error.as_deref().unwrap_or_default(),
                "Delivery failed permanently"
            ),
            DocumentStatus::Created | DocumentStatus::InProgress => {}
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{NewDocument, SqliteDocumentStore};
    use crate::scheduler::RetryPolicy;
    use crate::testing::{fixtures, MemoryBlobStore};

    struct Harness {
        documents: Arc<SqliteDocumentStore>,
        blobs: MemoryBlobStore,
        recorder: ResultRecorder,
    }

    fn harness() -> Harness {
        let documents = Arc::new(SqliteDocumentStore::in_memory().unwrap());
        let blobs = MemoryBlobStore::new();
        let policy = TransitionPolicy {
            retry: RetryPolicy::default(),
            ticket_poll_delay: chrono::Duration::seconds(10),
            max_ticket_polls: 5,
        };
        let recorder = ResultRecorder::new(documents.clone(), Arc::new(blobs.clone()), policy);
        Harness {
            documents,
            blobs,
            recorder,
        }
    }

    fn claimed(documents: &SqliteDocumentStore) -> Document {
        let document = documents
            .create(NewDocument {
                namespace_id: "acme".to_string(),
                file_ref: "blob-0".to_string(),
            })
            .unwrap();
        documents
            .claim(&document.id, "worker", Utc::now())
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_accepted_stores_receipt_then_releases() {
        let h = harness();
        let document = claimed(&h.documents);

        let outcome = Outcome::Accepted(fixtures::receipt("20123456789-01-F001-1"));
        let updated = h.recorder.record(&document, "worker", outcome).await.unwrap();

        assert_eq!(updated.status, DocumentStatus::Accepted);
        assert!(updated.claimed_by.is_none());
        let cdr_ref = updated.cdr_ref.unwrap();
        assert!(!h.blobs.fetch(&cdr_ref).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receipt_store_failure_never_accepts() {
        let h = harness();
        let document = claimed(&h.documents);
        h.blobs.fail_next_stores(1);

        let outcome = Outcome::Accepted(fixtures::receipt("20123456789-01-F001-1"));
        let updated = h.recorder.record(&document, "worker", outcome).await.unwrap();

        assert_eq!(updated.status, DocumentStatus::ScheduledRetry);
        assert_eq!(updated.retries, 1);
        assert!(updated.ambiguous);
        assert!(updated.cdr_ref.is_none());
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_lost_claim_is_reported() {
        let h = harness();
        let document = claimed(&h.documents);

        let outcome = Outcome::Fatal("credentials refused".to_string());
        let result = h.recorder.record(&document, "someone-else", outcome).await;

        match result {
            Err(SchedulerError::Unrecorded {
                status,
                cdr_ref,
                source,
                ..
            }) => {
                assert_eq!(status, DocumentStatus::Error);
                assert!(cdr_ref.is_none());
                assert!(matches!(source, DocumentError::ClaimLost(_)));
            }
            other => panic!("expected an unrecorded outcome, got {:?}", other),
        }
        let stored = h.documents.get(&document.id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::InProgress);
    }

    #[tokio::test]
    async fn test_lost_claim_surfaces_stored_receipt() {
        let h = harness();
        let document = claimed(&h.documents);

        let outcome = Outcome::Accepted(fixtures::receipt("20123456789-01-F001-1"));
        let result = h.recorder.record(&document, "someone-else", outcome).await;

        let Err(SchedulerError::Unrecorded {
            document_id,
            status,
            cdr_ref: Some(cdr_ref),
            ..
        }) = result
        else {
            panic!("expected the stored receipt to be reported");
        };
        assert_eq!(document_id, document.id);
        assert_eq!(status, DocumentStatus::Accepted);
        assert!(!h.blobs.fetch(&cdr_ref).await.unwrap().is_empty());

        let stored = h.documents.get(&document.id).unwrap().unwrap();
        assert!(stored.cdr_ref.is_none());
    }
}
