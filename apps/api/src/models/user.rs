use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Intern,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Admins and super-admins may review work and manage tasks.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    pub display_name: String,
    /// Stored in the form `normalize_email` produces. Older mixed-case
    /// records are still found by an exact match.
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub domain: Vec<String>,
    #[serde(default)]
    pub student_class: Option<String>,
}

/// Canonical form used for account lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Per-user activity trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub action: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}
