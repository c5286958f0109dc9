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
use crate::models::submission::{FileLink, Submission, SubmissionLogEntry};
use crate::state::AppState;
use crate::workflow::{
    ResubmissionDraft, ReviewDecision, SubmissionDraft, SubmissionEdit,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallRequest {
    #[serde(default)]
    pub submission_id: Option<String>,
}

/// POST /api/v1/submissions/recall
pub async fn handle_recall(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<RecallRequest>,
) -> Result<Json<Value>, AppError> {
    let submission_id = required_id(req.submission_id, "submissionId")?;
    let outcome = state.workflow.recall(&submission_id, &user.uid).await?;
    Ok(Json(json!({
        "message": "Submission recalled successfully",
        "warnings": outcome.secondary_failures,
    })))
}

/// POST /api/v1/submissions (multipart: `payload` + `files`)
pub async fn handle_submit(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let actor = resolve_actor(&state, &user).await?;
    let (draft, files) = read_multipart::<SubmissionDraft>(multipart).await?;
    let outcome = state.workflow.submit(&actor, draft, files).await?;
    Ok((StatusCode::CREATED, Json(outcome.value)))
}

/// PATCH /api/v1/submissions/:id
pub async fn handle_edit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(edit): Json<SubmissionEdit>,
) -> Result<Json<Value>, AppError> {
    let actor = resolve_actor(&state, &user).await?;
    let outcome = state.workflow.edit(&id, &actor, edit).await?;
    Ok(Json(json!({
        "changed": outcome.value,
        "warnings": outcome.secondary_failures,
    })))
}

/// POST /api/v1/submissions/:id/resubmit (multipart: `payload` + `files`)
pub async fn handle_resubmit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let actor = resolve_actor(&state, &user).await?;
    let (draft, files) = read_multipart::<ResubmissionDraft>(multipart).await?;
    let outcome = state.workflow.resubmit(&id, &actor, draft, files).await?;
    Ok((StatusCode::CREATED, Json(outcome.value)))
}

/// POST /api/v1/submissions/:id/review
pub async fn handle_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(decision): Json<ReviewDecision>,
) -> Result<Json<Submission>, AppError> {
    let actor = resolve_actor(&state, &user).await?;
    let outcome = state.workflow.review(&id, &actor, decision).await?;
    Ok(Json(outcome.value))
}

/// GET /api/v1/submissions/:id/logs
pub async fn handle_logs(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<SubmissionLogEntry>>, AppError> {
    let actor = resolve_actor(&state, &user).await?;
    Ok(Json(state.workflow.history(&id, &actor).await?))
}

/// GET /api/v1/submissions/:id/files
pub async fn handle_files(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<FileLink>>, AppError> {
    let actor = resolve_actor(&state, &user).await?;
    Ok(Json(state.workflow.file_links(&id, &actor).await?))
}
