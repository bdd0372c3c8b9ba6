//! Mapping of authority answers and transport errors onto delivery outcomes.

use reqwest::StatusCode;

use super::archive;
use super::soap::{SoapFault, XmlFields};
use super::{
    ConsultOutcome, Failure, FailureKind, PollOutcome, ProtocolError, Receipt, Rejection,
    SubmitOutcome,
};

/// The document was already registered by the authority.
pub const ALREADY_REGISTERED: u32 = 1033;

const TICKET_NOT_FOUND: u32 = 127;
const AUTHENTICATION_CODES: [u32; 4] = [102, 103, 104, 111];

/// Meaning of an authority response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeClass {
    /// `0`, or an observation (4000 and above).
    Accepted,
    /// Business rejection of the document content.
    Rejected,
    /// Credentials or profile refused.
    Authentication,
    TicketNotFound,
    /// Authority-side exception; the same request may succeed later.
    Transient,
}

pub fn classify_code(code: u32) -> CodeClass {
    match code {
        0 => CodeClass::Accepted,
        c if AUTHENTICATION_CODES.contains(&c) => CodeClass::Authentication,
        TICKET_NOT_FOUND => CodeClass::TicketNotFound,
        ALREADY_REGISTERED => CodeClass::Rejected,
        1..=1999 => CodeClass::Transient,
        2000..=3999 => CodeClass::Rejected,
        _ => CodeClass::Accepted,
    }
}

/// Operation-independent decision, converted into each operation's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(Receipt),
    Rejected(Rejection),
    Retryable(Failure),
    Fatal(String),
}

impl From<Verdict> for SubmitOutcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accepted(receipt) => SubmitOutcome::Accepted(receipt),
            Verdict::Rejected(rejection) => SubmitOutcome::Rejected(rejection),
            Verdict::Retryable(failure) => SubmitOutcome::Retryable(failure),
            Verdict::Fatal(message) => SubmitOutcome::Fatal(message),
        }
    }
}

impl From<Verdict> for PollOutcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accepted(receipt) => PollOutcome::Accepted(receipt),
            Verdict::Rejected(rejection) => PollOutcome::Rejected(rejection),
            Verdict::Retryable(failure) => PollOutcome::Retryable(failure),
            Verdict::Fatal(message) => PollOutcome::Fatal(message),
        }
    }
}

impl From<Verdict> for ConsultOutcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accepted(receipt) => ConsultOutcome::Accepted(receipt),
            Verdict::Rejected(rejection) => ConsultOutcome::Rejected(rejection),
            Verdict::Retryable(failure) => ConsultOutcome::Retryable(failure),
            // A refused consultation must not block delivery; fall back to resubmission rules.
            Verdict::Fatal(_) => ConsultOutcome::Unsupported,
        }
    }
}

/// Classify a SOAP fault. The authority answered, so nothing here is ambiguous.
pub fn fault_verdict(fault: &SoapFault) -> Verdict {
    match fault.numeric_code() {
        Some(code) => code_verdict(code, fault.description()),
        None => Verdict::Retryable(Failure::new(
            FailureKind::AuthorityUnavailable,
            format!("unclassified fault {}: {}", fault.code, fault.description()),
        )),
    }
}

/// Classify an error code reported outside a receipt.
pub fn code_verdict(code: u32, description: String) -> Verdict {
    match classify_code(code) {
        CodeClass::Authentication => {
            Verdict::Fatal(format!("credentials refused ({:04}): {}", code, description))
        }
        CodeClass::TicketNotFound => Verdict::Retryable(Failure::new(
            FailureKind::TicketNotFound,
            format!("{:04}: {}", code, description),
        )),
        CodeClass::Rejected => Verdict::Rejected(Rejection {
            code,
            message: description,
            cdr: None,
        }),
        CodeClass::Transient => Verdict::Retryable(Failure::new(
            FailureKind::AuthorityUnavailable,
            format!("{:04}: {}", code, description),
        )),
        CodeClass::Accepted => Verdict::Retryable(Failure::new(
            FailureKind::MalformedResponse,
            format!("error reported with non-error code {}: {}", code, description),
        )),
    }
}

/// Read the decision recorded in a zipped CDR.
pub fn cdr_verdict(cdr: Vec<u8>) -> Result<Verdict, ProtocolError> {
    let xml = archive::first_xml_entry(&cdr)?;
    let fields = XmlFields::parse(&xml)?;

    let code_text = fields
        .first("ResponseCode")
        .ok_or_else(|| ProtocolError::Malformed("receipt has no ResponseCode".to_string()))?;
    let code: u32 = code_text
        .parse()
        .map_err(|_| ProtocolError::Malformed(format!("invalid ResponseCode {}", code_text)))?;
    let description = fields.first("Description").unwrap_or_default().to_string();

    if classify_code(code) == CodeClass::Accepted {
        let notes = fields
            .all("Note")
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        Ok(Verdict::Accepted(Receipt {
            response_code: code,
            description,
            notes,
            cdr,
        }))
    } else {
        Ok(Verdict::Rejected(Rejection {
            code,
            message: description,
            cdr: Some(cdr),
        }))
    }
}

/// Classify a failed HTTP exchange.
///
/// `sent` marks requests with side effects: if the request may have been
/// written before the failure, the outcome is ambiguous.
pub fn transport_failure(error: &reqwest::Error, sent: bool) -> Failure {
    if error.is_timeout() {
        Failure {
            kind: FailureKind::Timeout,
            message: error.to_string(),
            ambiguous: sent,
        }
    } else if error.is_connect() {
        Failure::new(FailureKind::Connectivity, error.to_string())
    } else {
        Failure {
            kind: FailureKind::Connectivity,
            message: error.to_string(),
            ambiguous: sent,
        }
    }
}

/// Classify a non-success HTTP status that carried no SOAP fault.
pub fn status_verdict(status: StatusCode, sent: bool) -> Verdict {
    match status.as_u16() {
        401 | 403 => Verdict::Fatal(format!("authentication failed: HTTP {}", status)),
        408 | 429 | 500..=599 => Verdict::Retryable(Failure {
            kind: FailureKind::AuthorityUnavailable,
            message: format!("HTTP {}", status),
            ambiguous: sent,
        }),
        _ => Verdict::Fatal(format!("endpoint misconfigured: HTTP {}", status)),
    }
}
