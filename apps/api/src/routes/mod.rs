pub mod health;
pub mod password;
pub mod submissions;
pub mod tasks;
pub mod users;

use axum::{
    extract::Multipart,
    routing::{get, patch, post},
    Router,
};
use serde::de::DeserializeOwned;

use crate::auth::{load_profile, AuthUser};
use crate::errors::AppError;
use crate::state::AppState;
use crate::storage::UploadFile;
use crate::workflow::Actor;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Privileged boundary operations
        .route(
            "/api/v1/submissions/recall",
            post(submissions::handle_recall),
        )
        .route("/api/v1/tasks/delete", post(tasks::handle_delete_task))
        .route(
            "/api/v1/auth/forgot-password",
            post(password::handle_forgot_password),
        )
        // Submission workflow
        .route("/api/v1/submissions", post(submissions::handle_submit))
        .route("/api/v1/submissions/:id", patch(submissions::handle_edit))
        .route(
            "/api/v1/submissions/:id/resubmit",
            post(submissions::handle_resubmit),
        )
        .route(
            "/api/v1/submissions/:id/review",
            post(submissions::handle_review),
        )
        .route(
            "/api/v1/submissions/:id/logs",
            get(submissions::handle_logs),
        )
        .route(
            "/api/v1/submissions/:id/files",
            get(submissions::handle_files),
        )
        // Administration
        .route("/api/v1/tasks", post(tasks::handle_allot_task))
        .route("/api/v1/tasks/:id", patch(tasks::handle_edit_task))
        .route("/api/v1/users/:id/role", patch(users::handle_set_role))
        .with_state(state)
}

/// Resolves the caller's profile. A verified token without a profile gets 403.
async fn resolve_actor(state: &AppState, user: &AuthUser) -> Result<Actor, AppError> {
    load_profile(state.store.as_ref(), &user.uid)
        .await?
        .map(Actor::from)
        .ok_or_else(|| AppError::Forbidden("No profile for this account".to_string()))
}

/// Splits a multipart body into its JSON `payload` part and `files` parts.
async fn read_multipart<T: DeserializeOwned>(
    mut multipart: Multipart,
) -> Result<(T, Vec<UploadFile>), AppError> {
    let mut payload = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let part = field.name().map(str::to_string);
        match part.as_deref() {
            Some("payload") => payload = Some(field.text().await?),
            Some("files") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                files.push(UploadFile {
                    name,
                    content_type,
                    bytes,
                });
            }
            _ => {}
        }
    }

    let payload =
        payload.ok_or_else(|| AppError::Validation("Missing 'payload' part".to_string()))?;
    let parsed = serde_json::from_str(&payload)
        .map_err(|e| AppError::Validation(format!("Invalid payload: {e}")))?;
    Ok((parsed, files))
}

/// Trims an optional id from a request body; blank counts as missing.
fn required_id(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{field} is required")))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::build_router;
    use crate::auth::reset::{testing::RecordingMailer, MemoryResetTokens, PasswordResets};
    use crate::auth::{sign_for_tests, JwtVerifier};
    use crate::models::user::{Role, UserProfile};
    use crate::state::AppState;
    use crate::storage::MemoryObjectStorage;
    use crate::store::{to_fields, MemoryDocumentStore, USERS};
    use crate::workflow::{Buckets, Workflow};

    pub const SECRET: &str = "test-secret";

    pub struct TestApp {
        pub router: Router,
        pub store: Arc<MemoryDocumentStore>,
        pub storage: Arc<MemoryObjectStorage>,
        pub mailer: Arc<RecordingMailer>,
    }

    pub fn test_app() -> TestApp {
        let store = Arc::new(MemoryDocumentStore::new());
        let storage = Arc::new(MemoryObjectStorage::new());
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState {
            store: store.clone(),
            workflow: Workflow::new(
                store.clone(),
                storage.clone(),
                Buckets {
                    submissions: "submissions".to_string(),
                    tasks: "tasks".to_string(),
                },
            ),
            tokens: Arc::new(JwtVerifier::new(SECRET)),
            resets: Arc::new(PasswordResets::new(
                Arc::new(MemoryResetTokens::new()),
                mailer.clone(),
                "https://portal.test/reset",
            )),
        };
        TestApp {
            router: build_router(state),
            store,
            storage,
            mailer,
        }
    }

    pub fn seed_user(app: &TestApp, uid: &str, role: Role) {
        let profile = UserProfile {
            id: String::new(),
            display_name: format!("User {uid}"),
            email: format!("{uid}@example.com"),
            role,
            domain: vec!["web".to_string()],
            student_class: None,
        };
        app.store
            .insert_with_id(USERS, uid, to_fields(&profile).unwrap());
    }

    pub fn bearer(uid: &str) -> String {
        format!("Bearer {}", sign_for_tests(SECRET, uid, 600))
    }

    pub fn json_request(method: &str, uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    pub async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let request = axum::http::Request::builder()
            .uri("/health")
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
    }

    #[test]
    fn test_required_id_rejects_blank() {
        assert!(super::required_id(Some("  ".to_string()), "submissionId").is_err());
        assert!(super::required_id(None, "submissionId").is_err());
        assert_eq!(
            super::required_id(Some(" s1 ".to_string()), "submissionId").unwrap(),
            "s1"
        );
    }
}
