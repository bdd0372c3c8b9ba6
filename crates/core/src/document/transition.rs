//! The delivery state machine.
//!
//! [`apply`] maps a claimed document and the outcome of one protocol call to
//! the complete set of fields to persist. It performs no I/O; the scheduler
//! records the result through [`DocumentStore::release`](super::DocumentStore::release).

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::scheduler::RetryPolicy;
use crate::sender::{Failure, FailureKind, PollOutcome, Receipt, Rejection, SubmitOutcome};

use super::store::DocumentUpdate;
use super::types::{Document, DocumentStatus};

/// Outcome of one delivery attempt, whatever protocol call produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted(Receipt),
    Rejected(Rejection),
    Ticket(String),
    Pending,
    Retryable(Failure),
    Fatal(String),
}

impl From<SubmitOutcome> for Outcome {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Accepted(receipt) => Outcome::Accepted(receipt),
            SubmitOutcome::Rejected(rejection) => Outcome::Rejected(rejection),
            SubmitOutcome::Ticket(ticket) => Outcome::Ticket(ticket),
            SubmitOutcome::Retryable(failure) => Outcome::Retryable(failure),
            SubmitOutcome::Fatal(message) => Outcome::Fatal(message),
        }
    }
}

impl From<PollOutcome> for Outcome {
    fn from(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Pending => Outcome::Pending,
            PollOutcome::Accepted(receipt) => Outcome::Accepted(receipt),
            PollOutcome::Rejected(rejection) => Outcome::Rejected(rejection),
            PollOutcome::Retryable(failure) => Outcome::Retryable(failure),
            PollOutcome::Fatal(message) => Outcome::Fatal(message),
        }
    }
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Accepted(_) => "accepted",
            Outcome::Rejected(_) => "rejected",
            Outcome::Ticket(_) => "ticket",
            Outcome::Pending => "pending",
            Outcome::Retryable(_) => "retryable",
            Outcome::Fatal(_) => "fatal",
        }
    }
}

/// Timing rules applied by the state machine.
#[derive(Debug, Clone)]
pub struct TransitionPolicy {
    pub retry: RetryPolicy,
    /// Delay before each ticket poll.
    pub ticket_poll_delay: chrono::Duration,
    /// Consecutive pending polls tolerated before counting a retry.
    pub max_ticket_polls: u32,
}

impl TransitionPolicy {
    pub fn from_config(config: &crate::scheduler::SchedulerConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            ticket_poll_delay: chrono::Duration::seconds(config.ticket_poll_delay_secs as i64),
            max_ticket_polls: config.max_ticket_polls,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("document {document_id} is {status} and cannot record a {outcome} outcome")]
    InvalidTransition {
        document_id: String,
        status: DocumentStatus,
        outcome: &'static str,
    },
}

/// Fields to persist after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub update: DocumentUpdate,
    /// Receipt bytes to store before the update is committed.
    pub receipt: Option<Vec<u8>>,
}

/// Compute the transition of a claimed document for `outcome` at `now`.
///
/// The document must be `InProgress` or `SentAwaitingTicket`; any other
/// status means it was not claimed and nothing may be recorded.
pub fn apply(
    document: &Document,
    outcome: Outcome,
    policy: &TransitionPolicy,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    let invalid = |outcome: &Outcome| TransitionError::InvalidTransition {
        document_id: document.id.clone(),
        status: document.status,
        outcome: outcome.label(),
    };

    match document.status {
        DocumentStatus::InProgress | DocumentStatus::SentAwaitingTicket => {}
        _ => return Err(invalid(&outcome)),
    }

    let base = DocumentUpdate {
        status: document.status,
        retries: document.retries,
        last_error: document.last_error.clone(),
        ticket: document.ticket.clone(),
        scheduled_at: document.scheduled_at,
        cdr_ref: document.cdr_ref.clone(),
        ticket_polls: document.ticket_polls,
        ambiguous: document.ambiguous,
    };

    let transition = match outcome {
        Outcome::Accepted(receipt) => Transition {
            update: DocumentUpdate {
                status: DocumentStatus::Accepted,
                last_error: None,
                scheduled_at: None,
                ticket_polls: 0,
                ambiguous: false,
                ..base
            },
            receipt: Some(receipt.cdr),
        },
        Outcome::Rejected(rejection) => Transition {
            update: DocumentUpdate {
                status: DocumentStatus::Rejected,
                last_error: Some(rejection.message),
                scheduled_at: None,
                ticket_polls: 0,
                ambiguous: false,
                ..base
            },
            receipt: rejection.cdr,
        },
        Outcome::Ticket(ticket) => {
            if document.status != DocumentStatus::InProgress || document.ticket.is_some() {
                return Err(invalid(&Outcome::Ticket(ticket)));
            }
            Transition {
                update: DocumentUpdate {
                    status: DocumentStatus::SentAwaitingTicket,
                    last_error: None,
                    ticket: Some(ticket),
                    scheduled_at: Some(now + policy.ticket_poll_delay),
                    ticket_polls: 0,
                    ambiguous: false,
                    ..base
                },
                receipt: None,
            }
        }
        Outcome::Pending => {
            if document.ticket.is_none() {
                return Err(invalid(&Outcome::Pending));
            }
            let polls = document.ticket_polls + 1;
            if polls >= policy.max_ticket_polls {
                let failure = Failure::new(
                    FailureKind::TicketPending,
                    format!("ticket still pending after {} polls", polls),
                );
                return Ok(retry(document, base, failure, policy, now));
            }
            Transition {
                update: DocumentUpdate {
                    status: DocumentStatus::SentAwaitingTicket,
                    scheduled_at: Some(now + policy.ticket_poll_delay),
                    ticket_polls: polls,
                    ..base
                },
                receipt: None,
            }
        }
        Outcome::Retryable(failure) => retry(document, base, failure, policy, now),
        Outcome::Fatal(message) => Transition {
            update: DocumentUpdate {
                status: DocumentStatus::Error,
                last_error: Some(message),
                scheduled_at: None,
                ticket_polls: 0,
                ..base
            },
            receipt: None,
        },
    };

    Ok(transition)
}

fn retry(
    document: &Document,
    base: DocumentUpdate,
    failure: Failure,
    policy: &TransitionPolicy,
    now: DateTime<Utc>,
) -> Transition {
    let retries = (document.retries + 1).min(policy.retry.max_retries);
    let ambiguous = document.ambiguous || failure.ambiguous;

    let update = if policy.retry.is_exhausted(retries) {
        DocumentUpdate {
            status: DocumentStatus::Error,
            retries,
            last_error: Some(format!("max retries exceeded ({}): {}", retries, failure)),
            scheduled_at: None,
            ticket_polls: 0,
            ambiguous,
            ..base
        }
    } else {
        let delay = policy.retry.delay(retries, &document.id);
        DocumentUpdate {
            status: DocumentStatus::ScheduledRetry,
            retries,
            last_error: Some(failure.to_string()),
            scheduled_at: Some(now + chrono::Duration::milliseconds(delay.as_millis() as i64)),
            ticket_polls: 0,
            ambiguous,
            ..base
        }
    };

    Transition {
        update,
        receipt: None,
    }
}
