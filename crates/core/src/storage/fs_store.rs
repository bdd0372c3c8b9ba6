//! Content-addressed blob store on the local file system.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{BlobStore, StorageError};

/// Stores each blob under the hex SHA-256 of its content.
///
/// Writes go to a temporary file that is renamed into place, so a reader
/// never observes a partial blob.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, reference: &str) -> Result<PathBuf, StorageError> {
        let valid = reference.len() == 64
            && reference
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(StorageError::InvalidRef(reference.to_string()));
        }
        Ok(self.root.join(&reference[..2]).join(reference))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, bytes: &[u8]) -> Result<String, StorageError> {
        let reference = hex_digest(bytes);
        let path = self.path_for(&reference)?;

        if fs::try_exists(&path).await? {
            return Ok(reference);
        }

        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::WriteFailed {
                path: dir.clone(),
                source,
            })?;

        let temp = dir.join(format!(".{}.{}.tmp", reference, uuid::Uuid::new_v4()));
        let write = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            fs::rename(&temp, &path).await
        };

        if let Err(source) = write.await {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::WriteFailed { path, source });
        }

        Ok(reference)
    }

    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(reference)?;
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(reference.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_fetch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(temp_dir.path());

        let reference = store.store(b"<Invoice/>").await.unwrap();
        assert_eq!(reference.len(), 64);
        assert_eq!(store.fetch(&reference).await.unwrap(), b"<Invoice/>");
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(temp_dir.path());

        let first = store.store(b"same").await.unwrap();
        let second = store.store(b"same").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_missing_blob() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(temp_dir.path());

        let missing = "0".repeat(64);
        assert!(matches!(
            store.fetch(&missing).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_like_references() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(temp_dir.path());

        assert!(matches!(
            store.fetch("../../etc/passwd").await,
            Err(StorageError::InvalidRef(_))
        ));
    }
}
