use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{read_multipart, required_id, resolve_actor};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::task::Task;
use crate::state::AppState;
use crate::workflow::{TaskDraft, TaskEdit};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTaskRequest {
    #[serde(default)]
    pub task_id: Option<String>,
}

/// POST /api/v1/tasks/delete
///
/// Role is checked before the body so non-admins learn nothing about task ids.
pub async fn handle_delete_task(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<DeleteTaskRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = resolve_actor(&state, &user).await?;
    actor.require_admin()?;
    let task_id = required_id(req.task_id, "taskId")?;

    let outcome = state.workflow.delete_task(&task_id, &actor).await?;
    Ok(Json(json!({
        "message": "Task deleted successfully",
        "warnings": outcome.secondary_failures,
    })))
}

/// POST /api/v1/tasks (multipart: `payload` + `files`)
pub async fn handle_allot_task(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let actor = resolve_actor(&state, &user).await?;
    let (draft, files) = read_multipart::<TaskDraft>(multipart).await?;
    let outcome = state.workflow.allot_task(&actor, draft, files).await?;
    Ok((StatusCode::CREATED, Json(outcome.value)))
}

/// PATCH /api/v1/tasks/:id
pub async fn handle_edit_task(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
    Json(edit): Json<TaskEdit>,
) -> Result<Json<Task>, AppError> {
    let actor = resolve_actor(&state, &user).await?;
    let outcome = state.workflow.edit_task(&task_id, &actor, edit).await?;
    Ok(Json(outcome.value))
}
