use serde_json::json;
use tracing::info;

use super::{Actor, Outcome, Workflow, WorkflowError};
use crate::models::user::{Role, UserProfile};
use crate::store::{self, Fields, USERS};

impl Workflow {
    /// Super-admin only. A super-admin cannot change their own role.
    pub async fn set_role(
        &self,
        caller: &Actor,
        user_id: &str,
        role: Role,
    ) -> Result<Outcome<()>, WorkflowError> {
        if caller.role != Role::SuperAdmin {
            return Err(WorkflowError::NotSuperAdmin);
        }
        if caller.uid == user_id {
            return Err(WorkflowError::Validation(
                "Cannot change your own role".to_string(),
            ));
        }
        let profile = store::get_as::<UserProfile>(self.store(), USERS, user_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("User {user_id}")))?;
        if profile.role == role {
            return Ok(Outcome::new(()));
        }

        let mut partial = Fields::new();
        partial.insert("role".to_string(), json!(role));
        self.store().update(USERS, user_id, partial).await?;
        info!(
            "Role of {user_id} changed from {:?} to {:?} by {}",
            profile.role, role, caller.uid
        );
        Ok(Outcome::new(()))
    }
}
