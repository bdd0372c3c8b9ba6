//! Types for the delivery scheduler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{DocumentError, DocumentStatus, TransitionError};

/// Errors that can occur while scheduling deliveries.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("document store error: {0}")]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The attempt finished but its outcome could not be written back.
    /// `cdr_ref` points at a receipt already stored for it, if any.
    #[error(
        "{status} outcome for document {document_id} not recorded (receipt: {}): {source}",
        cdr_ref.as_deref().unwrap_or("none")
    )]
    Unrecorded {
        document_id: String,
        status: DocumentStatus,
        cdr_ref: Option<String>,
        #[source]
        source: DocumentError,
    },

    /// The worker pool was shut down while a tick was dispatching.
    #[error("worker pool closed")]
    PoolClosed,
}

/// Current status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    /// Deliveries currently holding a worker slot.
    pub in_flight: usize,
    pub max_workers: usize,
    /// Documents per status, keyed by status name.
    pub documents: BTreeMap<String, i64>,
}

/// What one scheduler tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Due documents found.
    pub due: usize,
    /// Documents this tick claimed and delivered.
    pub claimed: usize,
    /// Due documents another worker claimed first.
    pub skipped: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub awaiting_ticket: usize,
    pub scheduled_retry: usize,
    pub errored: usize,
    /// Attempts whose outcome could not be recorded.
    pub failed: usize,
}

impl TickReport {
    pub(crate) fn record(&mut self, status: DocumentStatus) {
        match status {
            DocumentStatus::Accepted => self.accepted += 1,
            DocumentStatus::Rejected => self.rejected += 1,
            DocumentStatus::SentAwaitingTicket => self.awaiting_ticket += 1,
            DocumentStatus::ScheduledRetry => self.scheduled_retry += 1,
            DocumentStatus::Error => self.errored += 1,
            DocumentStatus::Created | DocumentStatus::InProgress => self.failed += 1,
        }
    }
}
