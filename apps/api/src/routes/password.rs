use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// POST /api/v1/auth/forgot-password
///
/// Unauthenticated. The response never reveals whether the address is
/// registered or whether the mail went out.
pub async fn handle_forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<Value>, AppError> {
    let email = req
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::Validation("email is required".to_string()))?;

    let outcome = state.resets.request(state.store.as_ref(), &email).await?;
    tracing::debug!("Forgot-password outcome: {outcome:?}");

    Ok(Json(json!({
        "message": "If an account exists for this email, a reset link has been sent"
    })))
}
