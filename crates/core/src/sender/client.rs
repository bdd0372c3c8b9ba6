//! SOAP client for the tax authority's bill and consultation services.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::SenderConfig;
use crate::document::{DocumentContent, DocumentType};
use crate::metrics;

use super::classify::{self, Verdict};
use super::soap::{self, Operation, XmlFields};
use super::{
    archive, ConsultOutcome, DocumentSender, Failure, FailureKind, OutgoingDocument, PollOutcome,
    ProtocolError, Rejection, SubmitOutcome,
};

/// Ticket status: processing finished.
const TICKET_DONE: &str = "0";
/// Ticket status: still processing.
const TICKET_IN_PROCESS: &str = "98";
/// Ticket status: processing finished with errors.
const TICKET_DONE_WITH_ERRORS: &str = "99";

/// Receipt consultation codes meaning the authority never registered the document.
const CONSULT_NOT_FOUND: [&str; 2] = ["0011", "0127"];

/// Tax authority client speaking SOAP over HTTP.
pub struct SunatSender {
    client: Client,
}

impl SunatSender {
    /// Create a client whose every call is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ProtocolError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProtocolError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// POST one envelope and return the parsed body of a successful answer.
    ///
    /// `sent` is true for operations with side effects at the authority.
    async fn exchange(
        &self,
        url: &str,
        operation: Operation,
        envelope: String,
        sent: bool,
    ) -> Result<XmlFields, Verdict> {
        debug!(operation = operation.as_str(), url, "Calling tax authority");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", operation.soap_action())
            .body(envelope)
            .send()
            .await
            .map_err(|e| Verdict::Retryable(classify::transport_failure(&e, sent)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(classify::status_verdict(status, sent));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Verdict::Retryable(classify::transport_failure(&e, sent)))?;

        match XmlFields::parse(&body) {
            Ok(fields) => {
                if let Some(fault) = fields.fault() {
                    return Err(classify::fault_verdict(&fault));
                }
                if !status.is_success() {
                    return Err(classify::status_verdict(status, sent));
                }
                Ok(fields)
            }
            Err(_) if !status.is_success() => Err(classify::status_verdict(status, sent)),
            Err(e) => Err(Verdict::Retryable(Failure {
                kind: FailureKind::MalformedResponse,
                message: e.to_string(),
                ambiguous: sent,
            })),
        }
    }
}

/// Bill service endpoint for a document.
pub fn endpoint<'a>(
    content: &DocumentContent,
    config: &'a SenderConfig,
) -> Result<&'a str, ProtocolError> {
    fn configured<'a>(
        url: &'a Option<String>,
        what: &'static str,
    ) -> Result<&'a str, ProtocolError> {
        url.as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(ProtocolError::MissingEndpoint(what))
    }

    match content.document_type {
        DocumentType::Perception | DocumentType::Retention => {
            configured(&config.percepcion_retencion_url, "perceptions and retentions")
        }
        DocumentType::VoidedDocuments if content.is_perception_retention_voided() => {
            configured(&config.percepcion_retencion_url, "perceptions and retentions")
        }
        DocumentType::DespatchAdvice => configured(&config.guia_remision_url, "despatch advices"),
        _ => Ok(config.factura_url.as_str()),
    }
}

/// Decode a base64 zipped receipt and read its decision.
fn receipt_verdict(content_base64: &str, ambiguous: bool) -> Verdict {
    let cleaned: String = content_base64
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let decoded = BASE64
        .decode(cleaned)
        .map_err(|e| ProtocolError::Malformed(format!("receipt is not base64: {}", e)))
        .and_then(classify::cdr_verdict);

    decoded.unwrap_or_else(|e| {
        Verdict::Retryable(Failure {
            kind: FailureKind::MalformedResponse,
            message: e.to_string(),
            ambiguous,
        })
    })
}

fn malformed(message: &str, ambiguous: bool) -> Failure {
    Failure {
        kind: FailureKind::MalformedResponse,
        message: message.to_string(),
        ambiguous,
    }
}

fn observe(operation: Operation, outcome: &str, started: Instant) {
    metrics::DELIVERY_DURATION
        .with_label_values(&[operation.as_str()])
        .observe(started.elapsed().as_secs_f64());
    metrics::DELIVERY_ATTEMPTS
        .with_label_values(&[operation.as_str(), outcome])
        .inc();
}

fn submit_label(outcome: &SubmitOutcome) -> &'static str {
    match outcome {
        SubmitOutcome::Accepted(_) => "accepted",
        SubmitOutcome::Rejected(_) => "rejected",
        SubmitOutcome::Ticket(_) => "ticket",
        SubmitOutcome::Retryable(_) => "retryable",
        SubmitOutcome::Fatal(_) => "fatal",
    }
}

fn poll_label(outcome: &PollOutcome) -> &'static str {
    match outcome {
        PollOutcome::Pending => "pending",
        PollOutcome::Accepted(_) => "accepted",
        PollOutcome::Rejected(_) => "rejected",
        PollOutcome::Retryable(_) => "retryable",
        PollOutcome::Fatal(_) => "fatal",
    }
}

fn consult_label(outcome: &ConsultOutcome) -> &'static str {
    match outcome {
        ConsultOutcome::Accepted(_) => "accepted",
        ConsultOutcome::Rejected(_) => "rejected",
        ConsultOutcome::NotFound => "not_found",
        ConsultOutcome::Retryable(_) => "retryable",
        ConsultOutcome::Unsupported => "unsupported",
    }
}

#[async_trait]
impl DocumentSender for SunatSender {
    async fn submit(&self, document: &OutgoingDocument, config: &SenderConfig) -> SubmitOutcome {
        let content = &document.content;
        let url = match endpoint(content, config) {
            Ok(url) => url,
            Err(e) => return SubmitOutcome::Fatal(e.to_string()),
        };

        let stem = content.file_stem();
        let archive = match archive::pack(&stem, &document.signed_xml) {
            Ok(bytes) => bytes,
            Err(e) => return SubmitOutcome::Fatal(e.to_string()),
        };

        let operation = if content.document_type.is_asynchronous() {
            Operation::SendSummary
        } else {
            Operation::SendBill
        };
        let envelope = soap::send_file(
            &config.username,
            &config.password,
            operation,
            &format!("{}.zip", stem),
            &BASE64.encode(archive),
        );

        let started = Instant::now();
        let outcome = match self.exchange(url, operation, envelope, true).await {
            Err(verdict) => verdict.into(),
            Ok(fields) if operation == Operation::SendSummary => match fields.first("ticket") {
                Some(ticket) => SubmitOutcome::Ticket(ticket.to_string()),
                None => SubmitOutcome::Retryable(malformed("response carries no ticket", true)),
            },
            Ok(fields) => match fields.first("applicationResponse") {
                Some(receipt) => receipt_verdict(receipt, true).into(),
                None => SubmitOutcome::Retryable(malformed("response carries no receipt", true)),
            },
        };
        observe(operation, submit_label(&outcome), started);

        outcome
    }

    async fn poll(
        &self,
        ticket: &str,
        document: &OutgoingDocument,
        config: &SenderConfig,
    ) -> PollOutcome {
        let url = match endpoint(&document.content, config) {
            Ok(url) => url,
            Err(e) => return PollOutcome::Fatal(e.to_string()),
        };
        let envelope = soap::get_status(&config.username, &config.password, ticket);

        let started = Instant::now();
        let outcome = match self.exchange(url, Operation::GetStatus, envelope, false).await {
            Err(verdict) => verdict.into(),
            Ok(fields) => match (fields.first("statusCode"), fields.first("content")) {
                (Some(TICKET_IN_PROCESS), _) => PollOutcome::Pending,
                (Some(TICKET_DONE | TICKET_DONE_WITH_ERRORS), Some(receipt)) => {
                    receipt_verdict(receipt, false).into()
                }
                (Some(TICKET_DONE_WITH_ERRORS), None) => PollOutcome::Rejected(Rejection {
                    code: 99,
                    message: "ticket processed with errors, no receipt returned".to_string(),
                    cdr: None,
                }),
                (Some(TICKET_DONE), None) => {
                    PollOutcome::Retryable(malformed("ticket done without receipt", false))
                }
                (Some(other), _) => match other.parse::<u32>() {
                    Ok(code) => classify::code_verdict(
                        code,
                        fields.first("statusMessage").unwrap_or_default().to_string(),
                    )
                    .into(),
                    Err(_) => PollOutcome::Retryable(malformed(
                        &format!("unknown ticket status {}", other),
                        false,
                    )),
                },
                (None, _) => PollOutcome::Retryable(malformed("response carries no status", false)),
            },
        };
        observe(Operation::GetStatus, poll_label(&outcome), started);

        if let PollOutcome::Retryable(failure) = &outcome {
            warn!(ticket, error = %failure, "Ticket poll failed");
        }

        outcome
    }

    async fn consult(&self, document: &OutgoingDocument, config: &SenderConfig) -> ConsultOutcome {
        let content = &document.content;
        if content.document_type.is_asynchronous() {
            return ConsultOutcome::Unsupported;
        }
        let Some(url) = config
            .consulta_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
        else {
            return ConsultOutcome::Unsupported;
        };
        let (Some(code), Some((serie, numero))) =
            (content.catalog_code(), content.serie_and_numero())
        else {
            return ConsultOutcome::Unsupported;
        };

        let envelope = soap::get_status_cdr(
            &config.username,
            &config.password,
            &content.taxpayer_id,
            code,
            serie,
            numero,
        );

        let started = Instant::now();
        let outcome = match self
            .exchange(url, Operation::GetStatusCdr, envelope, false)
            .await
        {
            Err(Verdict::Retryable(failure)) => ConsultOutcome::Retryable(failure),
            Err(other) => {
                warn!(document = %content.document_id, verdict = ?other, "Receipt consultation refused");
                ConsultOutcome::Unsupported
            }
            Ok(fields) => match (fields.first("content"), fields.first("statusCode")) {
                (Some(receipt), _) => receipt_verdict(receipt, false).into(),
                (None, Some(status)) if CONSULT_NOT_FOUND.contains(&status) => {
                    ConsultOutcome::NotFound
                }
                (None, status) => ConsultOutcome::Retryable(malformed(
                    &format!(
                        "consultation returned status {} without a receipt",
                        status.unwrap_or("none")
                    ),
                    false,
                )),
            },
        };
        observe(Operation::GetStatusCdr, consult_label(&outcome), started);

        outcome
    }
}
