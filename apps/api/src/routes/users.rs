use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::resolve_actor;
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::user::Role;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

/// PATCH /api/v1/users/:id/role
pub async fn handle_set_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<String>,
    Json(req): Json<SetRoleRequest>,
) -> Result<StatusCode, AppError> {
    let actor = resolve_actor(&state, &user).await?;
    state.workflow.set_role(&actor, &user_id, req.role).await?;
    Ok(StatusCode::NO_CONTENT)
}
