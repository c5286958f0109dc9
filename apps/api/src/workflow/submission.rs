use std::collections::HashSet;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{require_text, validate_links, Actor, Outcome, Workflow, WorkflowError};
use crate::models::submission::{
    FileLink, FileRef, Submission, SubmissionLogEntry, SubmissionStatus, SupersededSubmission,
    SUPERSEDED_BY_RESUBMISSION,
};
use crate::models::task::Task;
use crate::models::user::ActivityLogEntry;
use crate::storage::UploadFile;
use crate::store::{
    self, to_fields, Fields, Filter, ACTIVITY_LOGS, SUBMISSIONS, SUBMISSION_HISTORY,
    SUBMISSION_LOGS, TASKS,
};

/// Intern-supplied fields for a brand new submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionDraft {
    pub title: String,
    pub domain: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub submission_date: Option<String>,
}

/// Full replacement of the owner-editable fields. `file_details` may only
/// drop files, never add them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionEdit {
    pub title: String,
    pub domain: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    pub file_details: Vec<FileRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResubmissionDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    /// Previously uploaded files carried into the new version.
    #[serde(default)]
    pub files_to_keep: Vec<FileRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDecision {
    pub status: SubmissionStatus,
    #[serde(default)]
    pub points: u32,
    #[serde(default)]
    pub feedback: Option<String>,
}

fn not_found(id: &str) -> WorkflowError {
    WorkflowError::NotFound(format!("Submission {id}"))
}

fn require_subset(kept: &[FileRef], existing: &[FileRef]) -> Result<(), WorkflowError> {
    match kept.iter().find(|f| !existing.contains(f)) {
        Some(unknown) => Err(WorkflowError::Validation(format!(
            "File {} is not attached to this submission",
            unknown.name
        ))),
        None => Ok(()),
    }
}

/// Owner-editable fields that differ, with their camelCase store names.
fn diff_edit(current: &Submission, edit: &SubmissionEdit) -> Vec<(&'static str, &'static str, Value)> {
    let mut changed = Vec::new();
    if current.title != edit.title {
        changed.push(("title", "title", json!(edit.title)));
    }
    if current.domain != edit.domain {
        changed.push(("domain", "domain", json!(edit.domain)));
    }
    if current.description != edit.description {
        changed.push(("description", "description", json!(edit.description)));
    }
    if current.links != edit.links {
        changed.push(("links", "links", json!(edit.links)));
    }
    if current.file_details != edit.file_details {
        changed.push(("fileDetails", "files", json!(edit.file_details)));
    }
    changed
}

impl Workflow {
    async fn load_submission(&self, id: &str) -> Result<Submission, WorkflowError> {
        store::get_as::<Submission>(self.store(), SUBMISSIONS, id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    async fn append_log(
        &self,
        submission_id: &str,
        actor: &Actor,
        action: String,
    ) -> Result<(), WorkflowError> {
        let entry = SubmissionLogEntry {
            id: String::new(),
            submission_id: submission_id.to_string(),
            actor_id: actor.uid.clone(),
            actor_name: actor.name.clone(),
            timestamp: Utc::now(),
            action,
        };
        self.store().create(SUBMISSION_LOGS, to_fields(&entry)?).await?;
        Ok(())
    }

    /// File ids still referenced by superseded versions along this
    /// submission's resubmission chain.
    async fn files_held_by_history(
        &self,
        submission: &Submission,
    ) -> Result<HashSet<String>, WorkflowError> {
        let mut held = HashSet::new();
        let mut visited = HashSet::new();
        let mut next = submission.original_submission_id.clone();
        while let Some(id) = next.take() {
            if !visited.insert(id.clone()) {
                break;
            }
            let entries: Vec<SupersededSubmission> = store::query_as(
                self.store(),
                SUBMISSION_HISTORY,
                &[Filter::eq("submissionId", id.as_str())],
            )
            .await?;
            for entry in entries {
                held.extend(entry.snapshot.file_details.iter().map(|f| f.id.clone()));
                if next.is_none() {
                    next = entry.snapshot.original_submission_id;
                }
            }
        }
        Ok(held)
    }

    /// Creates a new pending submission, uploading `files` first.
    pub async fn submit(
        &self,
        owner: &Actor,
        draft: SubmissionDraft,
        files: Vec<UploadFile>,
    ) -> Result<Outcome<Submission>, WorkflowError> {
        require_text(&draft.title, "title")?;
        require_text(&draft.domain, "domain")?;
        validate_links(&draft.links)?;

        let task_name = match &draft.task_id {
            Some(task_id) => {
                let task = store::get_as::<Task>(self.store(), TASKS, task_id)
                    .await?
                    .ok_or_else(|| WorkflowError::NotFound(format!("Task {task_id}")))?;
                let approved = self
                    .store()
                    .query(
                        SUBMISSIONS,
                        &[
                            Filter::eq("internId", owner.uid.as_str()),
                            Filter::eq("taskId", task_id.as_str()),
                            Filter::eq("status", SubmissionStatus::Approved.as_str()),
                        ],
                    )
                    .await?;
                if !approved.is_empty() {
                    return Err(WorkflowError::AlreadyApproved {
                        task_id: task_id.clone(),
                    });
                }
                Some(task.task_name)
            }
            None => None,
        };

        let bucket = self.buckets().submissions.clone();
        let file_details = self.upload_all(&bucket, &files).await?;

        let mut submission = Submission {
            id: String::new(),
            intern_id: owner.uid.clone(),
            intern_name: owner.name.clone(),
            title: draft.title.trim().to_string(),
            domain: draft.domain,
            description: draft.description,
            links: draft.links,
            file_details,
            status: SubmissionStatus::Pending,
            points: 0,
            feedback: None,
            submitted_at: Utc::now(),
            submission_date: draft.submission_date,
            task_id: draft.task_id,
            task_name,
            is_resubmission: false,
            original_submission_id: None,
        };

        let created = match to_fields(&submission) {
            Ok(fields) => self.store().create(SUBMISSIONS, fields).await,
            Err(e) => Err(e),
        };
        match created {
            Ok(id) => submission.id = id,
            Err(e) => {
                self.discard_uploads(&bucket, &submission.file_details).await;
                return Err(e.into());
            }
        }

        info!(
            "Submission {} created by {} with {} file(s)",
            submission.id,
            owner.uid,
            submission.file_details.len()
        );
        Ok(Outcome::new(submission))
    }

    /// Edits a pending submission in place. Returns the names of the changed
    /// fields; an empty list means nothing was written.
    pub async fn edit(
        &self,
        submission_id: &str,
        actor: &Actor,
        edit: SubmissionEdit,
    ) -> Result<Outcome<Vec<&'static str>>, WorkflowError> {
        let current = self.load_submission(submission_id).await?;
        if current.intern_id != actor.uid {
            return Err(WorkflowError::NotOwner);
        }
        if current.status != SubmissionStatus::Pending {
            return Err(WorkflowError::InvalidState {
                action: "edit",
                status: current.status,
            });
        }
        require_text(&edit.title, "title")?;
        require_text(&edit.domain, "domain")?;
        validate_links(&edit.links)?;
        require_subset(&edit.file_details, &current.file_details)?;

        let changed = diff_edit(&current, &edit);
        if changed.is_empty() {
            return Ok(Outcome::new(Vec::new()));
        }

        let partial: Fields = changed
            .iter()
            .map(|(key, _, value)| (key.to_string(), value.clone()))
            .collect();
        self.store()
            .update(SUBMISSIONS, submission_id, partial)
            .await?;

        let tags: Vec<&'static str> = changed.iter().map(|(_, tag, _)| *tag).collect();
        let mut outcome = Outcome::new(tags.clone());
        if let Err(e) = self
            .append_log(submission_id, actor, format!("Updated {}", tags.join(", ")))
            .await
        {
            outcome.note("audit log", e);
        }

        let dropped: Vec<&FileRef> = current
            .file_details
            .iter()
            .filter(|f| !edit.file_details.contains(f))
            .collect();
        if !dropped.is_empty() {
            match self.files_held_by_history(&current).await {
                Ok(held) => {
                    let bucket = &self.buckets().submissions;
                    for file in dropped.into_iter().filter(|f| !held.contains(&f.id)) {
                        if let Err(e) = self.storage().delete(bucket, &file.id).await {
                            outcome.note(format!("delete file {}", file.name), e);
                        }
                    }
                }
                // Without the history we cannot tell which files are shared.
                Err(e) => outcome.note("history lookup", e),
            }
        }

        info!("Submission {submission_id} edited by {}: {:?}", actor.uid, outcome.value);
        Ok(outcome)
    }

    /// Replaces a submission that needs revision with a fresh pending one.
    ///
    /// Order: upload new files, create the replacement, copy the predecessor
    /// into history, delete the predecessor. Any failure before the delete
    /// leaves the predecessor active and removes what this call created.
    pub async fn resubmit(
        &self,
        submission_id: &str,
        actor: &Actor,
        draft: ResubmissionDraft,
        new_files: Vec<UploadFile>,
    ) -> Result<Outcome<Submission>, WorkflowError> {
        let previous = self.load_submission(submission_id).await?;
        if previous.intern_id != actor.uid {
            return Err(WorkflowError::NotOwner);
        }
        if previous.status != SubmissionStatus::RevisionNeeded {
            return Err(WorkflowError::InvalidState {
                action: "resubmit",
                status: previous.status,
            });
        }
        require_text(&draft.title, "title")?;
        validate_links(&draft.links)?;
        require_subset(&draft.files_to_keep, &previous.file_details)?;

        let bucket = self.buckets().submissions.clone();
        let uploaded = self.upload_all(&bucket, &new_files).await?;

        let mut file_details = draft.files_to_keep;
        file_details.extend(uploaded.iter().cloned());

        let mut replacement = Submission {
            id: String::new(),
            intern_id: previous.intern_id.clone(),
            intern_name: previous.intern_name.clone(),
            title: draft.title.trim().to_string(),
            domain: previous.domain.clone(),
            description: draft.description,
            links: draft.links,
            file_details,
            status: SubmissionStatus::Pending,
            points: 0,
            feedback: None,
            submitted_at: Utc::now(),
            submission_date: previous.submission_date.clone(),
            task_id: previous.task_id.clone(),
            task_name: previous.task_name.clone(),
            is_resubmission: true,
            original_submission_id: Some(previous.id.clone()),
        };

        let created = match to_fields(&replacement) {
            Ok(fields) => self.store().create(SUBMISSIONS, fields).await,
            Err(e) => Err(e),
        };
        match created {
            Ok(id) => replacement.id = id,
            Err(e) => {
                self.discard_uploads(&bucket, &uploaded).await;
                return Err(e.into());
            }
        }

        let superseded = SupersededSubmission {
            id: String::new(),
            submission_id: previous.id.clone(),
            snapshot: previous.clone(),
            superseded_at: Utc::now(),
            superseded_by: actor.uid.clone(),
            reason: SUPERSEDED_BY_RESUBMISSION.to_string(),
        };
        let archived = match to_fields(&superseded) {
            Ok(fields) => self.store().create(SUBMISSION_HISTORY, fields).await,
            Err(e) => Err(e),
        };
        let history_id = match archived {
            Ok(id) => id,
            Err(e) => {
                self.withdraw_replacement(&replacement, &uploaded, None).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.store().delete(SUBMISSIONS, &previous.id).await {
            self.withdraw_replacement(&replacement, &uploaded, Some(&history_id))
                .await;
            return Err(e.into());
        }

        let mut outcome = Outcome::new(replacement);
        if let Err(e) = self
            .append_log(
                &outcome.value.id,
                actor,
                format!("Resubmitted after revision request (replaces {})", previous.id),
            )
            .await
        {
            outcome.note("audit log", e);
        }

        info!(
            "Submission {} superseded by {} ({})",
            previous.id, outcome.value.id, actor.uid
        );
        Ok(outcome)
    }

    /// Undoes a half-finished resubmission so the predecessor stays the only
    /// active version.
    async fn withdraw_replacement(
        &self,
        replacement: &Submission,
        uploaded: &[FileRef],
        history_id: Option<&str>,
    ) {
        if let Err(e) = self.store().delete(SUBMISSIONS, &replacement.id).await {
            warn!(
                "Could not withdraw replacement submission {}: {e}",
                replacement.id
            );
        }
        if let Some(history_id) = history_id {
            if let Err(e) = self.store().delete(SUBMISSION_HISTORY, history_id).await {
                warn!("Could not withdraw history entry {history_id}: {e}");
            }
        }
        self.discard_uploads(&self.buckets().submissions, uploaded)
            .await;
    }

    /// Withdraws a pending submission. Checks run in order: exists, caller
    /// owns it, still pending.
    pub async fn recall(
        &self,
        submission_id: &str,
        caller_id: &str,
    ) -> Result<Outcome<()>, WorkflowError> {
        let submission = self.load_submission(submission_id).await?;
        if submission.intern_id != caller_id {
            return Err(WorkflowError::NotOwner);
        }
        if submission.status != SubmissionStatus::Pending {
            return Err(WorkflowError::InvalidState {
                action: "recall",
                status: submission.status,
            });
        }

        self.store().delete(SUBMISSIONS, submission_id).await?;
        info!("Submission {submission_id} recalled by {caller_id}");

        let mut outcome = Outcome::new(());
        let entry = ActivityLogEntry {
            id: String::new(),
            user_id: caller_id.to_string(),
            action: "recall_submission".to_string(),
            details: format!("Recalled submission '{}' ({submission_id})", submission.title),
            timestamp: Utc::now(),
        };
        let logged = match to_fields(&entry) {
            Ok(fields) => self.store().create(ACTIVITY_LOGS, fields).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = logged {
            outcome.note("activity log", e);
        }
        Ok(outcome)
    }

    /// Admin grading of a pending submission.
    pub async fn review(
        &self,
        submission_id: &str,
        reviewer: &Actor,
        decision: ReviewDecision,
    ) -> Result<Outcome<Submission>, WorkflowError> {
        reviewer.require_admin()?;
        let mut submission = self.load_submission(submission_id).await?;
        if submission.status != SubmissionStatus::Pending {
            return Err(WorkflowError::InvalidState {
                action: "review",
                status: submission.status,
            });
        }
        if decision.status == SubmissionStatus::Pending {
            return Err(WorkflowError::Validation(
                "A review must approve or request revision".to_string(),
            ));
        }
        if let Some(task_id) = &submission.task_id {
            if let Some(task) = store::get_as::<Task>(self.store(), TASKS, task_id).await? {
                if decision.points > task.max_points {
                    return Err(WorkflowError::Validation(format!(
                        "Points exceed the task maximum of {}",
                        task.max_points
                    )));
                }
            }
        }

        let mut partial = Fields::new();
        partial.insert("status".to_string(), json!(decision.status));
        partial.insert("points".to_string(), json!(decision.points));
        partial.insert("feedback".to_string(), json!(decision.feedback));
        self.store()
            .update(SUBMISSIONS, submission_id, partial)
            .await?;

        submission.status = decision.status;
        submission.points = decision.points;
        submission.feedback = decision.feedback;

        let mut outcome = Outcome::new(submission);
        let action = format!(
            "Marked {} ({} points)",
            outcome.value.status, outcome.value.points
        );
        if let Err(e) = self.append_log(submission_id, reviewer, action).await {
            outcome.note("audit log", e);
        }
        info!(
            "Submission {submission_id} reviewed by {}: {}",
            reviewer.uid, outcome.value.status
        );
        Ok(outcome)
    }

    /// Audit trail, newest first. Visible to the owner and to admins.
    pub async fn history(
        &self,
        submission_id: &str,
        viewer: &Actor,
    ) -> Result<Vec<SubmissionLogEntry>, WorkflowError> {
        let submission = self.load_submission(submission_id).await?;
        if submission.intern_id != viewer.uid && !viewer.role.is_admin() {
            return Err(WorkflowError::NotOwner);
        }
        let mut entries: Vec<SubmissionLogEntry> = store::query_as(
            self.store(),
            SUBMISSION_LOGS,
            &[Filter::eq("submissionId", submission_id)],
        )
        .await?;
        // Stable ascending sort, then reverse: ties keep the later write first.
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        entries.reverse();
        Ok(entries)
    }

    /// View URLs for the submission's files, same visibility as `history`.
    pub async fn file_links(
        &self,
        submission_id: &str,
        viewer: &Actor,
    ) -> Result<Vec<FileLink>, WorkflowError> {
        let submission = self.load_submission(submission_id).await?;
        if submission.intern_id != viewer.uid && !viewer.role.is_admin() {
            return Err(WorkflowError::NotOwner);
        }
        let bucket = &self.buckets().submissions;
        Ok(submission
            .file_details
            .into_iter()
            .map(|f| FileLink {
                url: self.storage().view_url(bucket, &f.id),
                id: f.id,
                name: f.name,
            })
            .collect())
    }
}
