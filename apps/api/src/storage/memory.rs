use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStorage, StorageError, StoredObject, UploadFile};

/// In-process object storage. Backs `BACKEND=memory` and the test suite.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<(String, String), Bytes>>,
    failing_uploads: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads of a file with this name will fail.
    pub fn fail_upload_of(&self, name: &str) {
        self.failing_uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
    }

    /// Deletes of this object id will fail.
    pub fn fail_delete_of(&self, id: &str) {
        self.failing_deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string());
    }

    pub fn contains(&self, bucket: &str, id: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&(bucket.to_string(), id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(
        &self,
        bucket: &str,
        id: &str,
        file: &UploadFile,
    ) -> Result<StoredObject, StorageError> {
        if self
            .failing_uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&file.name)
        {
            return Err(StorageError::Upload {
                name: file.name.clone(),
                message: "rejected".to_string(),
            });
        }
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((bucket.to_string(), id.to_string()), file.bytes.clone());
        Ok(StoredObject { id: id.to_string() })
    }

    async fn delete(&self, bucket: &str, id: &str) -> Result<(), StorageError> {
        if self
            .failing_deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
        {
            return Err(StorageError::Delete {
                bucket: bucket.to_string(),
                id: id.to_string(),
                message: "rejected".to_string(),
            });
        }
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(bucket.to_string(), id.to_string()));
        Ok(())
    }

    fn view_url(&self, bucket: &str, id: &str) -> String {
        format!("memory://{bucket}/{id}")
    }
}
