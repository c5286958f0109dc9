use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::info;

use super::{ObjectStorage, StorageError, StoredObject, UploadFile};

/// S3 / MinIO backed storage. Objects are keyed by their generated id.
#[derive(Clone)]
pub struct S3ObjectStorage {
    client: aws_sdk_s3::Client,
    endpoint: String,
}

impl S3ObjectStorage {
    pub fn new(client: aws_sdk_s3::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn upload(
        &self,
        bucket: &str,
        id: &str,
        file: &UploadFile,
    ) -> Result<StoredObject, StorageError> {
        let content_type = file
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        self.client
            .put_object()
            .bucket(bucket)
            .key(id)
            .body(ByteStream::from(file.bytes.clone()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                name: file.name.clone(),
                message: e.to_string(),
            })?;

        info!("Uploaded '{}' to s3://{}/{}", file.name, bucket, id);
        Ok(StoredObject { id: id.to_string() })
    }

    async fn delete(&self, bucket: &str, id: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(id)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                bucket: bucket.to_string(),
                id: id.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn view_url(&self, bucket: &str, id: &str) -> String {
        object_url(&self.endpoint, bucket, id)
    }
}

fn object_url(endpoint: &str, bucket: &str, id: &str) -> String {
    format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_is_path_style() {
        assert_eq!(
            object_url("http://localhost:9000/", "submissions", "abc"),
            "http://localhost:9000/submissions/abc"
        );
    }
}
