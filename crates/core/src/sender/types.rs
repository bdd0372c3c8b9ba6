//! Types for tax-authority protocol operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SenderConfig;
use crate::document::DocumentContent;

/// Errors raised while building or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No endpoint configured for {0}")]
    MissingEndpoint(&'static str),
}

/// Why a retryable attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The connection could not be established.
    Connectivity,
    /// No response within the configured timeout.
    Timeout,
    /// The authority answered with something we could not interpret.
    MalformedResponse,
    /// The authority does not know the ticket (yet).
    TicketNotFound,
    /// The ticket stayed pending for too many polls.
    TicketPending,
    /// The authority reported a transient internal error.
    AuthorityUnavailable,
    /// Reading the document or writing the receipt failed locally.
    Storage,
    /// The process stopped while the attempt was in flight.
    Interrupted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Connectivity => "connectivity",
            FailureKind::Timeout => "timeout",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::TicketNotFound => "ticket_not_found",
            FailureKind::TicketPending => "ticket_pending",
            FailureKind::AuthorityUnavailable => "authority_unavailable",
            FailureKind::Storage => "storage",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retryable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// The request may have reached the authority; its effect is unknown.
    pub ambiguous: bool,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ambiguous: false,
        }
    }

    pub fn ambiguous(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ambiguous: true,
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The authority accepted the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// `0`, or an observation code of 4000 and above.
    pub response_code: u32,
    pub description: String,
    /// Observations attached to an accepted document.
    pub notes: Vec<String>,
    /// Zipped CDR exactly as returned by the authority.
    pub cdr: Vec<u8>,
}

/// The authority rejected the document content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: u32,
    pub message: String,
    /// Zipped CDR, when the rejection came with one.
    pub cdr: Option<Vec<u8>>,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.code, self.message)
    }
}

/// Result of submitting a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(Receipt),
    Rejected(Rejection),
    /// Batch document accepted for processing; poll the ticket for the decision.
    Ticket(String),
    Retryable(Failure),
    Fatal(String),
}

/// Result of polling a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Accepted(Receipt),
    Rejected(Rejection),
    Retryable(Failure),
    Fatal(String),
}

/// Result of asking the authority whether it already holds a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsultOutcome {
    Accepted(Receipt),
    Rejected(Rejection),
    /// The authority has no record of the document; resubmitting is safe.
    NotFound,
    Retryable(Failure),
    /// Consultation is not available for this document or configuration.
    Unsupported,
}

/// A signed document ready to be sent.
#[derive(Debug, Clone)]
pub struct OutgoingDocument {
    pub content: DocumentContent,
    pub signed_xml: Vec<u8>,
}

/// Trait for tax-authority protocol clients.
///
/// Implementations never return `Err`: every network or protocol problem is
/// classified into an outcome so the caller can record it.
#[async_trait]
pub trait DocumentSender: Send + Sync {
    /// Send a document: a decision for single documents, a ticket for batches.
    async fn submit(&self, document: &OutgoingDocument, config: &SenderConfig) -> SubmitOutcome;

    /// Ask for the decision on a previously issued ticket.
    async fn poll(
        &self,
        ticket: &str,
        document: &OutgoingDocument,
        config: &SenderConfig,
    ) -> PollOutcome;

    /// Look up the receipt of a single document without resubmitting it.
    async fn consult(&self, document: &OutgoingDocument, config: &SenderConfig) -> ConsultOutcome;
}
