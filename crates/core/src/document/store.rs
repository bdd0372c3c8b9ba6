//! Document storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{Document, DocumentStatus};

/// Error type for document operations.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Document not found.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Cannot perform operation due to current state.
    #[error("Cannot {operation} document {document_id}: current status is {current_status}")]
    InvalidState {
        document_id: String,
        current_status: String,
        operation: String,
    },

    /// The caller no longer owns the claim it is trying to release.
    #[error("Claim on document {0} is not held by this worker")]
    ClaimLost(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

/// Request to create a new document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub namespace_id: String,
    /// Blob reference of the signed XML.
    pub file_ref: String,
}

/// Full set of mutable delivery fields written when a claim is released.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentUpdate {
    pub status: DocumentStatus,
    pub retries: u32,
    pub last_error: Option<String>,
    pub ticket: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub cdr_ref: Option<String>,
    pub ticket_polls: u32,
    pub ambiguous: bool,
}

/// Filter for querying documents.
#[derive(Debug, Clone)]
pub struct DocumentFilter {
    /// Filter by namespace.
    pub namespace_id: Option<String>,
    /// Filter by status.
    pub status: Option<DocumentStatus>,
    /// Only claimed (`Some(true)`) or unclaimed (`Some(false)`) documents.
    pub claimed: Option<bool>,
    /// Only documents claimed at or before this instant.
    pub claimed_before: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for DocumentFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            namespace_id: None,
            status: None,
            claimed: None,
            claimed_before: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_namespace(mut self, namespace_id: impl Into<String>) -> Self {
        self.namespace_id = Some(namespace_id.into());
        self
    }

    pub fn with_status(mut self, status: DocumentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_claimed(mut self, claimed: bool) -> Self {
        self.claimed = Some(claimed);
        self
    }

    pub fn with_claimed_before(mut self, before: DateTime<Utc>) -> Self {
        self.claimed_before = Some(before);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for document storage backends.
///
/// Read methods never mutate. `claim` and `release` are the only way the
/// delivery pipeline changes a document, and each is a single atomic write.
pub trait DocumentStore: Send + Sync {
    /// Create a new document in `Created` status, due immediately.
    fn create(&self, request: NewDocument) -> Result<Document, DocumentError>;

    /// Get a document by ID.
    fn get(&self, id: &str) -> Result<Option<Document>, DocumentError>;

    /// List documents matching the filter, oldest first.
    fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>, DocumentError>;

    /// Count documents matching the filter.
    fn count(&self, filter: &DocumentFilter) -> Result<i64, DocumentError>;

    /// Unclaimed schedulable documents whose `scheduled_at` is due at `now`.
    fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Document>, DocumentError>;

    /// Atomically claim a due document for `claim_token`.
    ///
    /// `Created` and `ScheduledRetry` move to `InProgress`; `SentAwaitingTicket`
    /// keeps its status. Returns `None` when another worker holds the claim or
    /// the document is no longer due.
    fn claim(
        &self,
        id: &str,
        claim_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Document>, DocumentError>;

    /// Write the outcome of an attempt and drop the claim, all or nothing.
    fn release(
        &self,
        id: &str,
        claim_token: &str,
        update: &DocumentUpdate,
    ) -> Result<Document, DocumentError>;

    /// Operator action: move an `Error` document back into the schedule.
    ///
    /// Resets `retries` and `last_error`, keeps the ticket and the ambiguity
    /// flag so a possibly delivered document is reconciled, not resent.
    fn reset_for_retry(&self, id: &str) -> Result<Document, DocumentError>;
}
