use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    RevisionNeeded,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::RevisionNeeded => "revision_needed",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an uploaded file in the submissions bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
}

/// A stored file with its public view URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLink {
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default)]
    pub id: String,
    pub intern_id: String,
    pub intern_name: String,
    pub title: String,
    pub domain: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub file_details: Vec<FileRef>,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub points: u32,
    #[serde(default)]
    pub feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    /// Week marker the submission counts towards; carried across resubmissions.
    #[serde(default)]
    pub submission_date: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub is_resubmission: bool,
    #[serde(default)]
    pub original_submission_id: Option<String>,
}

/// One audit-trail line for a submission. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionLogEntry {
    #[serde(default)]
    pub id: String,
    pub submission_id: String,
    pub actor_id: String,
    pub actor_name: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
}

/// A submission retired by a resubmission, kept whole in the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupersededSubmission {
    #[serde(default)]
    pub id: String,
    pub submission_id: String,
    pub snapshot: Submission,
    pub superseded_at: DateTime<Utc>,
    pub superseded_by: String,
    pub reason: String,
}

pub const SUPERSEDED_BY_RESUBMISSION: &str = "resubmission";
