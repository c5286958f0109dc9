//! Submission Revision Workflow and the admin operations around it.
//!
//! Every operation awaits its collaborator calls strictly in order. The
//! primary effect of an operation either commits or the operation fails;
//! bookkeeping after the commit (audit lines, attachment cleanup) is
//! best-effort and reported through [`Outcome::secondary_failures`].

pub mod roles;
pub mod submission;
pub mod tasks;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::models::submission::{FileRef, SubmissionStatus};
use crate::models::user::{Role, UserProfile};
use crate::storage::{ObjectStorage, StorageError, UploadFile};
use crate::store::{DocumentStore, StoreError};

pub use submission::{ResubmissionDraft, ReviewDecision, SubmissionDraft, SubmissionEdit};
pub use tasks::{TaskDraft, TaskEdit};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Only the owner may do this")]
    NotOwner,

    #[error("Admin role required")]
    NotAdmin,

    #[error("Super-admin role required")]
    NotSuperAdmin,

    #[error("Cannot {action} a submission that is {status}")]
    InvalidState {
        action: &'static str,
        status: SubmissionStatus,
    },

    #[error("An approved submission already exists for task {task_id}")]
    AlreadyApproved { task_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A best-effort step that failed after the primary effect committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondaryFailure {
    pub step: String,
    pub detail: String,
}

#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub secondary_failures: Vec<SecondaryFailure>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            secondary_failures: Vec::new(),
        }
    }

    /// Records a failed best-effort step and logs it.
    pub fn note(&mut self, step: impl Into<String>, detail: impl ToString) {
        let step = step.into();
        let detail = detail.to_string();
        warn!("Best-effort step '{step}' failed: {detail}");
        self.secondary_failures.push(SecondaryFailure { step, detail });
    }

    pub fn is_clean(&self) -> bool {
        self.secondary_failures.is_empty()
    }
}

/// The authenticated user an operation runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub uid: String,
    pub name: String,
    pub role: Role,
}

impl From<UserProfile> for Actor {
    fn from(profile: UserProfile) -> Self {
        Self {
            uid: profile.id,
            name: profile.display_name,
            role: profile.role,
        }
    }
}

impl Actor {
    pub(crate) fn require_admin(&self) -> Result<(), WorkflowError> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(WorkflowError::NotAdmin)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets {
    pub submissions: String,
    pub tasks: String,
}

/// Entry point for every state-changing operation. Cheap to clone.
#[derive(Clone)]
pub struct Workflow {
    store: Arc<dyn DocumentStore>,
    storage: Arc<dyn ObjectStorage>,
    buckets: Buckets,
}

impl Workflow {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        buckets: Buckets,
    ) -> Self {
        Self {
            store,
            storage,
            buckets,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn storage(&self) -> &dyn ObjectStorage {
        self.storage.as_ref()
    }

    pub fn buckets(&self) -> &Buckets {
        &self.buckets
    }

    /// Uploads files one at a time. If any upload fails, files already
    /// uploaded by this call are deleted again (best-effort) and the error
    /// is returned.
    async fn upload_all(
        &self,
        bucket: &str,
        files: &[UploadFile],
    ) -> Result<Vec<FileRef>, WorkflowError> {
        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            let id = Uuid::new_v4().to_string();
            match self.storage.upload(bucket, &id, file).await {
                Ok(stored) => uploaded.push(FileRef {
                    id: stored.id,
                    name: file.name.clone(),
                }),
                Err(e) => {
                    self.discard_uploads(bucket, &uploaded).await;
                    return Err(e.into());
                }
            }
        }
        Ok(uploaded)
    }

    /// Best-effort removal of files that never became referenced.
    async fn discard_uploads(&self, bucket: &str, files: &[FileRef]) {
        for file in files {
            if let Err(e) = self.storage.delete(bucket, &file.id).await {
                warn!("Orphaned upload {}/{} left behind: {e}", bucket, file.id);
            }
        }
    }
}

pub(crate) fn require_text(value: &str, field: &str) -> Result<(), WorkflowError> {
    if value.trim().is_empty() {
        return Err(WorkflowError::Validation(format!("{field} is required")));
    }
    Ok(())
}

pub(crate) fn validate_links(links: &[String]) -> Result<(), WorkflowError> {
    for link in links {
        let parsed = reqwest::Url::parse(link)
            .map_err(|_| WorkflowError::Validation(format!("Invalid link: {link}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(WorkflowError::Validation(format!(
                "Links must be http(s): {link}"
            )));
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_links_must_be_http_urls() {
        assert!(validate_links(&["https://github.com/x".to_string()]).is_ok());
        assert!(validate_links(&["ftp://host/file".to_string()]).is_err());
        assert!(validate_links(&["not a url".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_failed_upload_discards_earlier_uploads() {
        let h = harness();
        h.storage.fail_upload_of("b.pdf");
        let files = vec![
            UploadFile::new("a.pdf", b"a".to_vec()),
            UploadFile::new("b.pdf", b"b".to_vec()),
        ];
        let err = h
            .workflow
            .upload_all("submissions", &files)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Storage(_)));
        assert_eq!(h.storage.len(), 0);
    }

    #[test]
    fn test_outcome_records_secondary_failures() {
        let mut outcome = Outcome::new(());
        assert!(outcome.is_clean());
        outcome.note("activity log", "store unavailable");
        assert_eq!(
            outcome.secondary_failures,
            vec![SecondaryFailure {
                step: "activity log".to_string(),
                detail: "store unavailable".to_string()
            }]
        );
    }

    #[test]
    fn test_actor_from_profile() {
        let actor = Actor::from(UserProfile {
            id: "u9".to_string(),
            display_name: "Ravi".to_string(),
            email: "ravi@example.com".to_string(),
            role: Role::SuperAdmin,
            domain: vec![],
            student_class: None,
        });
        assert_eq!(actor.uid, "u9");
        assert!(actor.require_admin().is_ok());
        assert!(intern("u1").require_admin().is_err());
    }
}
