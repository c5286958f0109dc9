use std::collections::BTreeSet;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{require_text, validate_links, Actor, Outcome, Workflow, WorkflowError};
use crate::models::task::{Attachment, Task};
use crate::storage::UploadFile;
use crate::store::{self, to_fields, Fields, TASKS};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub task_name: String,
    pub domain: String,
    pub description: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    pub max_points: u32,
    #[serde(default)]
    pub assigned_to: BTreeSet<String>,
}

/// Admin changes to an existing task. Absent fields are left alone; an empty
/// `instructions` clears them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEdit {
    pub task_name: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub links: Option<Vec<String>>,
    pub max_points: Option<u32>,
    pub assigned_to: Option<BTreeSet<String>>,
}

fn validate_max_points(max_points: u32) -> Result<(), WorkflowError> {
    if max_points == 0 {
        return Err(WorkflowError::Validation(
            "maxPoints must be positive".to_string(),
        ));
    }
    Ok(())
}

impl Workflow {
    /// Creates a task and uploads its attachments to the task bucket.
    pub async fn allot_task(
        &self,
        admin: &Actor,
        draft: TaskDraft,
        files: Vec<UploadFile>,
    ) -> Result<Outcome<Task>, WorkflowError> {
        admin.require_admin()?;
        require_text(&draft.task_name, "taskName")?;
        require_text(&draft.domain, "domain")?;
        require_text(&draft.description, "description")?;
        validate_links(&draft.links)?;
        validate_max_points(draft.max_points)?;

        let bucket = self.buckets().tasks.clone();
        let uploaded = self.upload_all(&bucket, &files).await?;

        let mut task = Task {
            id: String::new(),
            task_name: draft.task_name.trim().to_string(),
            domain: draft.domain,
            description: draft.description,
            instructions: draft.instructions,
            links: draft.links,
            max_points: draft.max_points,
            attachments: uploaded
                .iter()
                .map(|f| Attachment {
                    name: f.name.clone(),
                    file_id: f.id.clone(),
                })
                .collect(),
            assigned_to: draft.assigned_to,
            assigned_by: admin.uid.clone(),
            created_at: Utc::now(),
        };

        let created = match to_fields(&task) {
            Ok(fields) => self.store().create(TASKS, fields).await,
            Err(e) => Err(e),
        };
        match created {
            Ok(id) => task.id = id,
            Err(e) => {
                self.discard_uploads(&bucket, &uploaded).await;
                return Err(e.into());
            }
        }

        info!(
            "Task {} allotted by {} to {} intern(s)",
            task.id,
            admin.uid,
            task.assigned_to.len()
        );
        Ok(Outcome::new(task))
    }

    /// Applies an admin's edit to a task, writing only the fields that change.
    pub async fn edit_task(
        &self,
        task_id: &str,
        admin: &Actor,
        edit: TaskEdit,
    ) -> Result<Outcome<Task>, WorkflowError> {
        admin.require_admin()?;
        let mut task = store::get_as::<Task>(self.store(), TASKS, task_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Task {task_id}")))?;

        let mut partial = Fields::new();
        if let Some(name) = edit.task_name {
            require_text(&name, "taskName")?;
            let name = name.trim().to_string();
            if name != task.task_name {
                partial.insert("taskName".to_string(), json!(name));
                task.task_name = name;
            }
        }
        if let Some(description) = edit.description {
            require_text(&description, "description")?;
            if description != task.description {
                partial.insert("description".to_string(), json!(description));
                task.description = description;
            }
        }
        if let Some(instructions) = edit.instructions {
            let instructions = Some(instructions).filter(|i| !i.trim().is_empty());
            if instructions != task.instructions {
                partial.insert("instructions".to_string(), json!(instructions));
                task.instructions = instructions;
            }
        }
        if let Some(links) = edit.links {
            validate_links(&links)?;
            if links != task.links {
                partial.insert("links".to_string(), json!(links));
                task.links = links;
            }
        }
        if let Some(max_points) = edit.max_points {
            validate_max_points(max_points)?;
            if max_points != task.max_points {
                partial.insert("maxPoints".to_string(), json!(max_points));
                task.max_points = max_points;
            }
        }
        if let Some(assigned_to) = edit.assigned_to {
            if assigned_to != task.assigned_to {
                partial.insert("assignedTo".to_string(), json!(assigned_to));
                task.assigned_to = assigned_to;
            }
        }

        if partial.is_empty() {
            return Ok(Outcome::new(task));
        }
        let changed: Vec<String> = partial.keys().cloned().collect();
        self.store().update(TASKS, task_id, partial).await?;
        info!("Task {task_id} edited by {}: {}", admin.uid, changed.join(", "));
        Ok(Outcome::new(task))
    }

    /// Deletes a task. Attachment cleanup is best-effort per file; the task
    /// record is deleted regardless.
    pub async fn delete_task(
        &self,
        task_id: &str,
        caller: &Actor,
    ) -> Result<Outcome<()>, WorkflowError> {
        caller.require_admin()?;
        let task = store::get_as::<Task>(self.store(), TASKS, task_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Task {task_id}")))?;

        let mut outcome = Outcome::new(());
        let bucket = &self.buckets().tasks;
        for attachment in &task.attachments {
            if let Err(e) = self.storage().delete(bucket, &attachment.file_id).await {
                outcome.note(format!("delete attachment {}", attachment.name), e);
            }
        }

        self.store().delete(TASKS, task_id).await?;
        info!(
            "Task {task_id} deleted by {} ({} attachment failure(s))",
            caller.uid,
            outcome.secondary_failures.len()
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use crate::workflow::testing::*;

    fn draft() -> TaskDraft {
        TaskDraft {
            task_name: "Build landing page".to_string(),
            domain: "web".to_string(),
            description: "Responsive landing page".to_string(),
            instructions: Some("Use the design kit".to_string()),
            links: vec!["https://figma.com/file/1".to_string()],
            max_points: 10,
            assigned_to: BTreeSet::from(["u1".to_string(), "u2".to_string()]),
        }
    }

    async fn allot_with_files(h: &Harness, names: &[&str]) -> Task {
        let files = names
            .iter()
            .map(|n| UploadFile::new(*n, b"x".to_vec()))
            .collect();
        h.workflow
            .allot_task(&admin("a1"), draft(), files)
            .await
            .unwrap()
            .value
    }

    #[tokio::test]
    async fn test_allot_uploads_attachments() {
        let h = harness();
        let task = allot_with_files(&h, &["brief.pdf", "kit.zip"]).await;
        assert_eq!(task.attachments.len(), 2);
        assert_eq!(task.assigned_by, "a1");
        for a in &task.attachments {
            assert!(h.storage.contains("tasks", &a.file_id));
        }
    }

    #[tokio::test]
    async fn test_intern_cannot_allot() {
        let h = harness();
        let err = h
            .workflow
            .allot_task(&intern("u1"), draft(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAdmin));
    }

    #[tokio::test]
    async fn test_delete_task_removes_record_and_attachments() {
        let h = harness();
        let task = allot_with_files(&h, &["brief.pdf"]).await;
        let outcome = h.workflow.delete_task(&task.id, &admin("a1")).await.unwrap();
        assert!(outcome.is_clean());
        assert!(h.store.get(TASKS, &task.id).await.unwrap().is_none());
        assert_eq!(h.storage.len(), 0);
    }

    #[tokio::test]
    async fn test_delete_task_proceeds_when_attachment_delete_fails() {
        let h = harness();
        let task = allot_with_files(&h, &["a.pdf", "b.pdf", "c.pdf"]).await;
        h.storage.fail_delete_of(&task.attachments[1].file_id);

        let outcome = h.workflow.delete_task(&task.id, &admin("a1")).await.unwrap();
        assert_eq!(outcome.secondary_failures.len(), 1);
        assert_eq!(outcome.secondary_failures[0].step, "delete attachment b.pdf");
        assert!(h.store.get(TASKS, &task.id).await.unwrap().is_none());
        // The loop continued past the failure.
        assert!(!h.storage.contains("tasks", &task.attachments[2].file_id));
    }

    #[tokio::test]
    async fn test_delete_task_checks_role_before_existence() {
        let h = harness();
        let err = h
            .workflow
            .delete_task("missing", &intern("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAdmin));
        let err = h
            .workflow
            .delete_task("missing", &admin("a1"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_edit_task_updates_only_given_fields() {
        let h = harness();
        let task = allot_with_files(&h, &[]).await;
        let edit = TaskEdit {
            max_points: Some(20),
            assigned_to: Some(BTreeSet::from(["u3".to_string()])),
            instructions: Some("  ".to_string()),
            ..TaskEdit::default()
        };
        let edited = h
            .workflow
            .edit_task(&task.id, &admin("a1"), edit)
            .await
            .unwrap()
            .value;
        assert_eq!(edited.max_points, 20);
        assert_eq!(edited.instructions, None);

        let stored: Task = store::get_as(h.store.as_ref(), TASKS, &task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, edited);
        assert_eq!(stored.task_name, "Build landing page");
        assert_eq!(stored.assigned_to, BTreeSet::from(["u3".to_string()]));
    }

    #[tokio::test]
    async fn test_edit_task_rejects_bad_values() {
        let h = harness();
        let task = allot_with_files(&h, &[]).await;
        for edit in [
            TaskEdit {
                max_points: Some(0),
                ..TaskEdit::default()
            },
            TaskEdit {
                task_name: Some(" ".to_string()),
                ..TaskEdit::default()
            },
            TaskEdit {
                links: Some(vec!["ftp://files".to_string()]),
                ..TaskEdit::default()
            },
        ] {
            let err = h
                .workflow
                .edit_task(&task.id, &admin("a1"), edit)
                .await
                .unwrap_err();
            assert!(matches!(err, WorkflowError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_edit_task_requires_admin_and_existing_task() {
        let h = harness();
        let task = allot_with_files(&h, &[]).await;
        let err = h
            .workflow
            .edit_task(&task.id, &intern("u1"), TaskEdit::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAdmin));
        let err = h
            .workflow
            .edit_task("missing", &admin("a1"), TaskEdit::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }
}
