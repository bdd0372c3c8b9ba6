//! Fiscal number types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{DocumentType, UnsupportedDocumentType};

/// Errors that can occur while allocating fiscal numbers.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Lost the optimistic race on every attempt.
    #[error("allocation conflict: gave up after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error(transparent)]
    UnsupportedDocumentType(#[from] UnsupportedDocumentType),

    /// Strategy identifier not known to the registry.
    #[error("unknown numbering strategy: {0}")]
    UnknownStrategy(String),

    /// The sequence for a key cannot grow any further.
    #[error("numbering exhausted for {0}")]
    Exhausted(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Identity of an independent number sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumberKey {
    pub namespace: String,
    pub taxpayer_id: String,
    pub document_type: DocumentType,
}

impl NumberKey {
    pub fn new(
        namespace: impl Into<String>,
        taxpayer_id: impl Into<String>,
        document_type: DocumentType,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            taxpayer_id: taxpayer_id.into(),
            document_type,
        }
    }
}

impl std::fmt::Display for NumberKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.taxpayer_id, self.document_type
        )
    }
}

/// The last number issued for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalNumber {
    pub namespace: String,
    pub taxpayer_id: String,
    pub document_type: DocumentType,
    pub serie: String,
    pub numero: u32,
    /// Optimistic lock version; bumped on every allocation.
    pub version: u32,
}

impl FiscalNumber {
    /// First number of a fresh sequence.
    pub fn first(key: &NumberKey, serie: impl Into<String>) -> Self {
        Self {
            namespace: key.namespace.clone(),
            taxpayer_id: key.taxpayer_id.clone(),
            document_type: key.document_type,
            serie: serie.into(),
            numero: 1,
            version: 1,
        }
    }

    pub fn key(&self) -> NumberKey {
        NumberKey::new(&self.namespace, &self.taxpayer_id, self.document_type)
    }

    /// Printed identifier, e.g. `F001-42`.
    pub fn document_id(&self) -> String {
        format!("{}-{}", self.serie, self.numero)
    }
}
