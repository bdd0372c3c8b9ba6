//! Blob storage for signed documents and receipts.

mod fs_store;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub use fs_store::FsBlobStore;

/// Errors that can occur while storing or fetching blobs.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob reference: {0}")]
    InvalidRef(String),

    #[error("Failed to write blob at {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque byte storage addressed by reference.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` and return a reference to them.
    async fn store(&self, bytes: &[u8]) -> Result<String, StorageError>;

    /// Read back the bytes behind a reference.
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, StorageError>;
}
