//! Mock tax-authority client for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::SenderConfig;
use crate::sender::{
    ConsultOutcome, DocumentSender, OutgoingDocument, PollOutcome, Receipt, SubmitOutcome,
};

use super::fixtures;

/// Which protocol call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderCall {
    Submit,
    Poll,
    Consult,
}

/// A recorded protocol call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub call: SenderCall,
    /// Document id from the XML content, e.g. `F001-1`.
    pub document_id: String,
    pub ticket: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Mock implementation of the DocumentSender trait.
///
/// Provides controllable behavior for testing:
/// - Script outcomes per operation (consumed in order)
/// - Record every call for assertions
/// - Add artificial latency
/// - Detect overlapping calls for the same document
///
/// When a script runs out, submit accepts, poll accepts and consult is
/// unsupported.
#[derive(Debug, Clone)]
pub struct MockSender {
    submits: Arc<RwLock<VecDeque<SubmitOutcome>>>,
    polls: Arc<RwLock<VecDeque<PollOutcome>>>,
    consults: Arc<RwLock<VecDeque<ConsultOutcome>>>,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    latency: Arc<RwLock<Duration>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    overlaps: Arc<AtomicUsize>,
}

impl Default for MockSender {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a document from the in-flight set when the call returns.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    document_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.document_id);
        }
    }
}

impl MockSender {
    pub fn new() -> Self {
        Self {
            submits: Arc::new(RwLock::new(VecDeque::new())),
            polls: Arc::new(RwLock::new(VecDeque::new())),
            consults: Arc::new(RwLock::new(VecDeque::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            latency: Arc::new(RwLock::new(Duration::ZERO)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            overlaps: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue outcomes for the next submit calls.
    pub async fn push_submit(&self, outcome: SubmitOutcome) {
        self.submits.write().await.push_back(outcome);
    }

    /// Queue outcomes for the next poll calls.
    pub async fn push_poll(&self, outcome: PollOutcome) {
        self.polls.write().await.push_back(outcome);
    }

    /// Queue outcomes for the next consult calls.
    pub async fn push_consult(&self, outcome: ConsultOutcome) {
        self.consults.write().await.push_back(outcome);
    }

    /// Delay every call by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = latency;
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Calls of one kind.
    pub async fn calls_of(&self, call: SenderCall) -> Vec<RecordedCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.call == call)
            .cloned()
            .collect()
    }

    /// Number of calls that started while another call for the same
    /// document was still running.
    pub fn overlapping_calls(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: SenderCall, document: &OutgoingDocument, ticket: Option<&str>) -> InFlightGuard {
        let document_id = document.content.document_id.clone();

        self.calls.write().await.push(RecordedCall {
            call,
            document_id: document_id.clone(),
            ticket: ticket.map(str::to_string),
            timestamp: Utc::now(),
        });

        if let Ok(mut set) = self.in_flight.lock() {
            if !set.insert(document_id.clone()) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }

        let latency = *self.latency.read().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            document_id,
        }
    }
}

fn default_receipt(document: &OutgoingDocument) -> Receipt {
    let stem = document.content.file_stem();
    Receipt {
        response_code: 0,
        description: format!("El comprobante {} ha sido aceptado", document.content.document_id),
        notes: Vec::new(),
        cdr: fixtures::cdr_zip(&stem, 0, "aceptado"),
    }
}

#[async_trait]
impl DocumentSender for MockSender {
    async fn submit(&self, document: &OutgoingDocument, _config: &SenderConfig) -> SubmitOutcome {
        let _guard = self.enter(SenderCall::Submit, document, None).await;
        let scripted = self.submits.write().await.pop_front();
        scripted.unwrap_or_else(|| SubmitOutcome::Accepted(default_receipt(document)))
    }

    async fn poll(
        &self,
        ticket: &str,
        document: &OutgoingDocument,
        _config: &SenderConfig,
    ) -> PollOutcome {
        let _guard = self.enter(SenderCall::Poll, document, Some(ticket)).await;
        let scripted = self.polls.write().await.pop_front();
        scripted.unwrap_or_else(|| PollOutcome::Accepted(default_receipt(document)))
    }

    async fn consult(&self, document: &OutgoingDocument, _config: &SenderConfig) -> ConsultOutcome {
        let _guard = self.enter(SenderCall::Consult, document, None).await;
        let scripted = self.consults.write().await.pop_front();
        scripted.unwrap_or(ConsultOutcome::Unsupported)
    }
}
