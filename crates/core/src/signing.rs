//! XML signing capability.
//!
//! Signature production and key management live outside this crate; the
//! delivery service only needs something that turns unsigned XML into
//! signed XML.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),

    #[error("Signing failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait XmlSigner: Send + Sync {
    /// Sign `xml` with the key registered under `key_alias`.
    async fn sign(&self, xml: &[u8], key_alias: &str) -> Result<Vec<u8>, SigningError>;
}
