//! Entry points used by callers that produce documents.
//!
//! The service numbers documents, accepts signed XML into the delivery queue
//! and exposes the operator and read operations. Delivery itself is driven by
//! the [`DeliveryScheduler`](crate::scheduler::DeliveryScheduler).

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::document::{
    analyze, ContentError, Document, DocumentError, DocumentFilter, DocumentStore, NewDocument,
};
use crate::numbering::{AllocationError, FiscalNumber, StrategyRegistry};
use crate::signing::{SigningError, XmlSigner};
use crate::storage::{BlobStore, StorageError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// The XML is not a document the authority accepts.
    #[error("invalid document: {0}")]
    Content(#[from] ContentError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("no signer configured")]
    SignerUnavailable,
}

pub struct DeliveryService {
    numbering: StrategyRegistry,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    signer: Option<Arc<dyn XmlSigner>>,
}

impl DeliveryService {
    pub fn new(
        numbering: StrategyRegistry,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            numbering,
            documents,
            blobs,
            signer: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn XmlSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Next fiscal number for the document type, or `None` when the type
    /// carries caller-supplied numbering.
    pub fn allocate(
        &self,
        namespace: &str,
        taxpayer_id: &str,
        document_type: &str,
    ) -> Result<Option<FiscalNumber>, ServiceError> {
        Ok(self.numbering.allocate(namespace, taxpayer_id, document_type)?)
    }

    /// Queue a signed document for delivery.
    ///
    /// The XML is checked before anything is stored, so an unsupported
    /// document never enters the queue.
    pub async fn enqueue(
        &self,
        namespace: &str,
        signed_xml: &[u8],
    ) -> Result<Document, ServiceError> {
        let content = analyze(signed_xml)?;
        let file_ref = self.blobs.store(signed_xml).await?;
        let document = self.documents.create(NewDocument {
            namespace_id: namespace.to_string(),
            file_ref,
        })?;

        info!(
            document_id = %document.id,
            namespace = namespace,
            document_type = %content.document_type,
            number = %content.document_id,
            "Document queued for delivery"
        );
        Ok(document)
    }

    /// Sign `xml` with `key_alias`, then queue it.
    pub async fn sign_and_enqueue(
        &self,
        namespace: &str,
        xml: &[u8],
        key_alias: &str,
    ) -> Result<Document, ServiceError> {
        let signer = self.signer.as_ref().ok_or(ServiceError::SignerUnavailable)?;
        analyze(xml)?;
        let signed = signer.sign(xml, key_alias).await?;
        self.enqueue(namespace, &signed).await
    }

    /// Operator retry of a document in `Error`.
    ///
    /// Retries restart from zero and the document is due immediately. Its
    /// fiscal number, ticket and ambiguity flag are kept.
    pub fn retry_document(&self, id: &str) -> Result<Document, ServiceError> {
        let document = self.documents.reset_for_retry(id)?;
        info!(document_id = %document.id, "Document rescheduled by operator");
        Ok(document)
    }

    pub fn get(&self, id: &str) -> Result<Option<Document>, ServiceError> {
        Ok(self.documents.get(id)?)
    }

    pub fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>, ServiceError> {
        Ok(self.documents.list(filter)?)
    }

    pub fn count(&self, filter: &DocumentFilter) -> Result<i64, ServiceError> {
        Ok(self.documents.count(filter)?)
    }

    /// Zipped receipt of a document, once the authority has issued one.
    pub async fn fetch_receipt(&self, id: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        let document = self
            .documents
            .get(id)?
            .ok_or_else(|| DocumentError::NotFound(id.to_string()))?;
        match document.cdr_ref {
            Some(reference) => Ok(Some(self.blobs.fetch(&reference).await?)),
            None => Ok(None),
        }
    }
}
