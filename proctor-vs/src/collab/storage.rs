//! Image storage collaborator
//!
//! Two areas: `incoming` holds every accepted alert image until it is
//! verified, `verified` holds permanent evidence for true positives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::is_plain_file_name;

/// Reference to a staged (incoming) image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

/// Reference to an image in permanent storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredRef(String);

impl ImageRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl StoredRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for StoredRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage failure
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Worth another attempt within the retry budget
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io(_))
    }
}

/// Image persistence
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Keep an accepted alert image until it is verified
    async fn stage(&self, name: &str, image: &[u8]) -> Result<ImageRef, StorageError>;

    /// Read a staged image back
    async fn load(&self, reference: &ImageRef) -> Result<Vec<u8>, StorageError>;

    /// Persist evidence permanently
    async fn store(&self, name: &str, image: &[u8]) -> Result<StoredRef, StorageError>;

    /// Drop a staged image that will never be verified
    async fn discard(&self, reference: &ImageRef) -> Result<(), StorageError>;
}

/// Filesystem-backed image store
pub struct FsImageStore {
    incoming_dir: PathBuf,
    verified_dir: PathBuf,
}

impl FsImageStore {
    /// Create `<images_dir>/incoming` and `<images_dir>/verified`
    pub async fn open(images_dir: &Path) -> Result<Self, StorageError> {
        let incoming_dir = images_dir.join("incoming");
        let verified_dir = images_dir.join("verified");
        tokio::fs::create_dir_all(&incoming_dir).await?;
        tokio::fs::create_dir_all(&verified_dir).await?;

        Ok(Self {
            incoming_dir,
            verified_dir,
        })
    }

    pub fn verified_path(&self, reference: &StoredRef) -> PathBuf {
        self.verified_dir.join(reference.as_str())
    }

    fn checked_name(name: &str) -> Result<&str, StorageError> {
        if is_plain_file_name(name) {
            Ok(name)
        } else {
            Err(StorageError::InvalidReference(name.to_string()))
        }
    }
}

/// Write through a temp file so readers never see a partial image
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp_path = path.with_extension("part");
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn stage(&self, name: &str, image: &[u8]) -> Result<ImageRef, StorageError> {
        let name = Self::checked_name(name)?;
        write_atomically(&self.incoming_dir.join(name), image).await?;
        Ok(ImageRef::new(name))
    }

    async fn load(&self, reference: &ImageRef) -> Result<Vec<u8>, StorageError> {
        let name = Self::checked_name(reference.as_str())?;
        match tokio::fs::read(self.incoming_dir.join(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn store(&self, name: &str, image: &[u8]) -> Result<StoredRef, StorageError> {
        let name = Self::checked_name(name)?;
        write_atomically(&self.verified_dir.join(name), image).await?;
        Ok(StoredRef::new(name))
    }

    async fn discard(&self, reference: &ImageRef) -> Result<(), StorageError> {
        let name = Self::checked_name(reference.as_str())?;
        match tokio::fs::remove_file(self.incoming_dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
