//! Document record and classification types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delivery status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Stored and waiting for its first attempt.
    Created,
    /// Claimed by a worker; a submission may be in flight.
    InProgress,
    /// Batch submission accepted by the authority; waiting on the ticket.
    SentAwaitingTicket,
    /// Last attempt failed with a retryable error.
    ScheduledRetry,
    /// Terminal: the authority accepted the document.
    Accepted,
    /// Terminal: the authority rejected the content.
    Rejected,
    /// Terminal: retries exhausted or a fatal failure. Needs an operator.
    Error,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 7] = [
        DocumentStatus::Created,
        DocumentStatus::InProgress,
        DocumentStatus::SentAwaitingTicket,
        DocumentStatus::ScheduledRetry,
        DocumentStatus::Accepted,
        DocumentStatus::Rejected,
        DocumentStatus::Error,
    ];

    /// Returns the string representation used in storage and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Created => "created",
            DocumentStatus::InProgress => "in_progress",
            DocumentStatus::SentAwaitingTicket => "sent_awaiting_ticket",
            DocumentStatus::ScheduledRetry => "scheduled_retry",
            DocumentStatus::Accepted => "accepted",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Error => "error",
        }
    }

    /// Terminal statuses are never scheduled again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Accepted | DocumentStatus::Rejected | DocumentStatus::Error
        )
    }

    /// Statuses the scheduler picks up once `scheduled_at` is due.
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Created
                | DocumentStatus::ScheduledRetry
                | DocumentStatus::SentAwaitingTicket
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown document status: {}", s))
    }
}

/// A document type the authority does not accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported document type: {0}")]
pub struct UnsupportedDocumentType(pub String);

/// Kind of fiscal document, as identified by its UBL root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    CreditNote,
    DebitNote,
    VoidedDocuments,
    SummaryDocuments,
    Perception,
    Retention,
    DespatchAdvice,
}

impl DocumentType {
    pub const ALL: [DocumentType; 8] = [
        DocumentType::Invoice,
        DocumentType::CreditNote,
        DocumentType::DebitNote,
        DocumentType::VoidedDocuments,
        DocumentType::SummaryDocuments,
        DocumentType::Perception,
        DocumentType::Retention,
        DocumentType::DespatchAdvice,
    ];

    /// Canonical identifier used as numbering key and in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::CreditNote => "credit_note",
            DocumentType::DebitNote => "debit_note",
            DocumentType::VoidedDocuments => "voided_documents",
            DocumentType::SummaryDocuments => "summary_documents",
            DocumentType::Perception => "perception",
            DocumentType::Retention => "retention",
            DocumentType::DespatchAdvice => "despatch_advice",
        }
    }

    /// UBL root element local name.
    pub fn root_element(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "Invoice",
            DocumentType::CreditNote => "CreditNote",
            DocumentType::DebitNote => "DebitNote",
            DocumentType::VoidedDocuments => "VoidedDocuments",
            DocumentType::SummaryDocuments => "SummaryDocuments",
            DocumentType::Perception => "Perception",
            DocumentType::Retention => "Retention",
            DocumentType::DespatchAdvice => "DespatchAdvice",
        }
    }

    /// Batch types are answered with a ticket instead of a receipt.
    pub fn is_asynchronous(&self) -> bool {
        matches!(
            self,
            DocumentType::VoidedDocuments | DocumentType::SummaryDocuments
        )
    }

    /// Two-digit catalog code used in archive names. Batch types have none.
    pub fn catalog_code(&self) -> Option<&'static str> {
        match self {
            DocumentType::Invoice => Some("01"),
            DocumentType::CreditNote => Some("07"),
            DocumentType::DebitNote => Some("08"),
            DocumentType::Retention => Some("20"),
            DocumentType::Perception => Some("40"),
            DocumentType::DespatchAdvice => Some("09"),
            DocumentType::VoidedDocuments | DocumentType::SummaryDocuments => None,
        }
    }

    /// Resolve a UBL root element local name.
    pub fn from_root_element(name: &str) -> Result<Self, UnsupportedDocumentType> {
        DocumentType::ALL
            .into_iter()
            .find(|t| t.root_element() == name)
            .ok_or_else(|| UnsupportedDocumentType(name.to_string()))
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = UnsupportedDocumentType;

    /// Accepts the canonical identifier or the UBL root element name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.root_element() == s)
            .ok_or_else(|| UnsupportedDocumentType(s.to_string()))
    }
}

/// A document queued for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub namespace_id: String,
    /// Blob reference of the signed XML.
    pub file_ref: String,
    /// Blob reference of the authority receipt (CDR), once stored.
    pub cdr_ref: Option<String>,
    pub status: DocumentStatus,
    /// Retryable failures so far.
    pub retries: u32,
    /// Diagnostic of the last failure, or the authority's rejection message.
    pub last_error: Option<String>,
    pub ticket: Option<String>,
    /// Earliest next attempt. `None` means due now.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Consecutive pending ticket polls.
    pub ticket_polls: u32,
    /// The remote effect of the last submission is unknown.
    pub ambiguous: bool,
    /// Claim token of the worker that owns the row.
    pub claimed_by: Option<String>,
    /// When the current claim was taken.
    pub claimed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Whether the scheduler may claim this document at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_schedulable()
            && self.claimed_by.is_none()
            && self.scheduled_at.is_none_or(|at| at <= now)
    }
}
