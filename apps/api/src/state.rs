use std::sync::Arc;

use crate::auth::reset::PasswordResets;
use crate::auth::TokenVerifier;
use crate::store::DocumentStore;
use crate::workflow::Workflow;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    /// Holds the same store plus object storage; the only writer path.
    pub workflow: Workflow,
    pub tokens: Arc<dyn TokenVerifier>,
    pub resets: Arc<PasswordResets>,
}
