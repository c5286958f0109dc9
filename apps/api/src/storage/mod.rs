//! Object storage for submission files and task attachments.

pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryObjectStorage;
pub use s3::S3ObjectStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload of '{name}' failed: {message}")]
    Upload { name: String, message: String },

    #[error("Delete of {bucket}/{id} failed: {message}")]
    Delete {
        bucket: String,
        id: String,
        message: String,
    },
}

/// A file received from a client, not yet stored.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: String,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `file` under the caller-generated `id`.
    async fn upload(
        &self,
        bucket: &str,
        id: &str,
        file: &UploadFile,
    ) -> Result<StoredObject, StorageError>;

    async fn delete(&self, bucket: &str, id: &str) -> Result<(), StorageError>;

    /// Public URL for viewing an object. No network call.
    fn view_url(&self, bucket: &str, id: &str) -> String;
}
