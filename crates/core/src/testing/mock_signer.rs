//! Signer double for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::signing::{SigningError, XmlSigner};

/// Returns the XML unchanged and records the key aliases it was asked for.
///
/// Aliases listed in `unknown_keys` fail with `SigningError::UnknownKey`.
#[derive(Debug, Clone, Default)]
pub struct PassthroughSigner {
    requested: Arc<RwLock<Vec<String>>>,
    unknown_keys: Arc<RwLock<Vec<String>>>,
}

impl PassthroughSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reject_key(&self, alias: &str) {
        self.unknown_keys.write().await.push(alias.to_string());
    }

    pub async fn requested_keys(&self) -> Vec<String> {
        self.requested.read().await.clone()
    }
}

#[async_trait]
impl XmlSigner for PassthroughSigner {
    async fn sign(&self, xml: &[u8], key_alias: &str) -> Result<Vec<u8>, SigningError> {
        self.requested.write().await.push(key_alias.to_string());
        if self.unknown_keys.read().await.iter().any(|k| k == key_alias) {
            return Err(SigningError::UnknownKey(key_alias.to_string()));
        }
        Ok(xml.to_vec())
    }
}
