//! One delivery attempt for one claimed document.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SenderSection;
use crate::document::{analyze, Document, Outcome};
use crate::sender::{
    ConsultOutcome, DocumentSender, Failure, FailureKind, OutgoingDocument, SubmitOutcome,
    ALREADY_REGISTERED,
};
use crate::storage::BlobStore;

use super::recorder::ResultRecorder;
use super::SchedulerError;

/// Everything a worker task needs; cheap to clone into spawned tasks.
#[derive(Clone)]
pub(crate) struct Worker {
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) sender: Arc<dyn DocumentSender>,
    pub(crate) senders: Arc<SenderSection>,
    pub(crate) recorder: Arc<ResultRecorder>,
}

impl Worker {
    /// Run one attempt for a document claimed with `claim_token` and record it.
    pub(crate) async fn deliver(
        &self,
        document: Document,
        claim_token: &str,
    ) -> Result<Document, SchedulerError> {
        debug!(
            document_id = %document.id,
            status = %document.status,
            retries = document.retries,
            "Delivering document"
        );
        let outcome = self.attempt(&document).await;
        self.recorder.record(&document, claim_token, outcome).await
    }

    async fn attempt(&self, document: &Document) -> Outcome {
        let signed_xml = match self.blobs.fetch(&document.file_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Outcome::Retryable(Failure::new(
                    FailureKind::Storage,
                    format!("signed document unavailable: {}", e),
                ))
            }
        };

        let content = match analyze(&signed_xml) {
            Ok(content) => content,
            Err(e) => return Outcome::Fatal(format!("stored document is unreadable: {}", e)),
        };

        let config = self
            .senders
            .resolve(&document.namespace_id, &content.taxpayer_id);
        let outgoing = OutgoingDocument {
            content,
            signed_xml,
        };

        if let Some(ticket) = &document.ticket {
            debug!(document_id = %document.id, ticket = %ticket, "Polling ticket");
            return self.sender.poll(ticket, &outgoing, &config).await.into();
        }

        let asynchronous = outgoing.content.document_type.is_asynchronous();
        if document.ambiguous && !asynchronous {
            match self.sender.consult(&outgoing, &config).await {
                ConsultOutcome::Accepted(receipt) => {
                    info!(document_id = %document.id, "Receipt recovered by consultation");
                    return Outcome::Accepted(receipt);
                }
                ConsultOutcome::Rejected(rejection) => return Outcome::Rejected(rejection),
                ConsultOutcome::Retryable(failure) => {
                    return Outcome::Retryable(Failure {
                        ambiguous: true,
                        ..failure
                    })
                }
                ConsultOutcome::NotFound => {
                    info!(document_id = %document.id, "Authority has no record, resubmitting");
                }
                ConsultOutcome::Unsupported => {
                    debug!(document_id = %document.id, "Consultation unavailable, resubmitting");
                }
            }
        }

        match self.sender.submit(&outgoing, &config).await {
            SubmitOutcome::Rejected(rejection)
                if rejection.code == ALREADY_REGISTERED && document.ambiguous =>
            {
                warn!(
                    document_id = %document.id,
                    "Document was registered by an unconfirmed attempt"
                );
                Outcome::Fatal(format!(
                    "already registered by an earlier unconfirmed attempt; fetch its receipt from the authority ({})",
                    rejection
                ))
            }
            other => other.into(),
        }
    }
}
