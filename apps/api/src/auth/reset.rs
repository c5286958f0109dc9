//! Password reset requests.
//!
//! A reset token is parked in a short-lived token store and a link is mailed
//! to the account's address. Callers never learn whether the address exists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::user::{normalize_email, UserProfile};
use crate::store::{self, DocumentStore, Filter, StoreError, USERS};

pub const RESET_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    async fn put(&self, token: &str, uid: &str, ttl: Duration) -> Result<()>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_reset_link(&self, email: &str, link: &str) -> Result<()>;
}

/// Tokens under `password_reset:<token>` with a Redis-side expiry.
pub struct RedisResetTokens {
    client: redis::Client,
}

impl RedisResetTokens {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResetTokenStore for RedisResetTokens {
    async fn put(&self, token: &str, uid: &str, ttl: Duration) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Redis connection failed")?;
        redis::cmd("SET")
            .arg(format!("password_reset:{token}"))
            .arg(uid)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await
            .context("Redis SET failed")?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryResetTokens {
    tokens: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryResetTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live tokens issued for `uid`.
    pub fn tokens_for(&self, uid: &str) -> Vec<String> {
        let now = Instant::now();
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, (owner, expires))| owner == uid && *expires > now)
            .map(|(token, _)| token.clone())
            .collect()
    }
}

#[async_trait]
impl ResetTokenStore for MemoryResetTokens {
    async fn put(&self, token: &str, uid: &str, ttl: Duration) -> Result<()> {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        tokens.retain(|_, (_, expires)| *expires > now);
        tokens.insert(token.to_string(), (uid.to_string(), now + ttl));
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    to: &'a str,
    subject: &'a str,
    text: String,
}

/// Posts reset mail to an HTTP mail relay.
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
}

impl HttpMailer {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url: relay_url.into(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_reset_link(&self, email: &str, link: &str) -> Result<()> {
        self.client
            .post(&self.relay_url)
            .json(&RelayMessage {
                to: email,
                subject: "Reset your password",
                text: format!("Use this link to choose a new password: {link}\n\nThe link expires in one hour."),
            })
            .send()
            .await
            .context("Mail relay unreachable")?
            .error_for_status()
            .context("Mail relay rejected message")?;
        Ok(())
    }
}

/// Used when no relay is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_reset_link(&self, email: &str, _link: &str) -> Result<()> {
        info!("No mail relay configured; reset link for {email} not delivered");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Sent,
    UnknownEmail,
    DeliveryFailed,
}

/// Looks the address up in canonical form, then as typed for records stored
/// before emails were normalized.
async fn find_account(
    store: &dyn DocumentStore,
    email: &str,
) -> Result<Option<UserProfile>, StoreError> {
    let canonical = normalize_email(email);
    let mut candidates = vec![canonical.clone()];
    if email.trim() != canonical {
        candidates.push(email.trim().to_string());
    }
    for candidate in candidates {
        let users: Vec<UserProfile> =
            store::query_as(store, USERS, &[Filter::eq("email", candidate.as_str())]).await?;
        if let Some(user) = users.into_iter().next() {
            return Ok(Some(user));
        }
    }
    Ok(None)
}

pub struct PasswordResets {
    tokens: Arc<dyn ResetTokenStore>,
    mailer: Arc<dyn Mailer>,
    link_base: String,
}

impl PasswordResets {
    pub fn new(
        tokens: Arc<dyn ResetTokenStore>,
        mailer: Arc<dyn Mailer>,
        link_base: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            mailer,
            link_base: link_base.into(),
        }
    }

    /// Issues a reset link if `email` belongs to an account. Only a failed
    /// account lookup is an error; token or delivery trouble is logged.
    pub async fn request(
        &self,
        store: &dyn DocumentStore,
        email: &str,
    ) -> Result<ResetOutcome, StoreError> {
        let Some(user) = find_account(store, email).await? else {
            info!("Password reset requested for unregistered address");
            return Ok(ResetOutcome::UnknownEmail);
        };

        let token = Uuid::new_v4().simple().to_string();
        if let Err(e) = self.tokens.put(&token, &user.id, RESET_TOKEN_TTL).await {
            warn!("Could not store reset token for {}: {e:#}", user.id);
            return Ok(ResetOutcome::DeliveryFailed);
        }

        let link = format!("{}?token={token}", self.link_base.trim_end_matches('/'));
        match self.mailer.send_reset_link(&user.email, &link).await {
            Ok(()) => {
                info!("Password reset link issued for {}", user.id);
                Ok(ResetOutcome::Sent)
            }
            Err(e) => {
                warn!("Reset mail for {} not delivered: {e:#}", user.id);
                Ok(ResetOutcome::DeliveryFailed)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingMailer;
    use super::*;
    use crate::models::user::Role;
    use crate::store::{to_fields, MemoryDocumentStore};

    async fn store_with_user() -> MemoryDocumentStore {
        store_with_email("asha@example.com")
    }

    fn store_with_email(email: &str) -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        let profile = UserProfile {
            id: String::new(),
            display_name: "Asha".to_string(),
            email: email.to_string(),
            role: Role::Intern,
            domain: vec!["web".to_string()],
            student_class: None,
        };
        store.insert_with_id(USERS, "u1", to_fields(&profile).unwrap());
        store
    }

    #[tokio::test]
    async fn test_known_email_gets_link_and_token() {
        let store = store_with_user().await;
        let tokens = Arc::new(MemoryResetTokens::new());
        let mailer = Arc::new(RecordingMailer::default());
        let resets = PasswordResets::new(tokens.clone(), mailer.clone(), "https://portal/reset/");

        let outcome = resets.request(&store, "  Asha@Example.com ").await.unwrap();
        assert_eq!(outcome, ResetOutcome::Sent);

        let issued = tokens.tokens_for("u1");
        assert_eq!(issued.len(), 1);
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent[0].0, "asha@example.com");
        assert_eq!(sent[0].1, format!("https://portal/reset?token={}", issued[0]));
    }

    #[tokio::test]
    async fn test_unknown_email_sends_nothing() {
        let store = store_with_user().await;
        let mailer = Arc::new(RecordingMailer::default());
        let resets = PasswordResets::new(
            Arc::new(MemoryResetTokens::new()),
            mailer.clone(),
            "https://portal/reset",
        );
        let outcome = resets.request(&store, "nobody@example.com").await.unwrap();
        assert_eq!(outcome, ResetOutcome::UnknownEmail);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_not_an_error() {
        let store = store_with_user().await;
        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let resets = PasswordResets::new(
            Arc::new(MemoryResetTokens::new()),
            mailer,
            "https://portal/reset",
        );
        let outcome = resets.request(&store, "asha@example.com").await.unwrap();
        assert_eq!(outcome, ResetOutcome::DeliveryFailed);
    }

    #[tokio::test]
    async fn test_mixed_case_stored_email_still_found() {
        let store = store_with_email("Asha@Example.com");
        let tokens = Arc::new(MemoryResetTokens::new());
        let mailer = Arc::new(RecordingMailer::default());
        let resets = PasswordResets::new(tokens.clone(), mailer.clone(), "https://portal/reset");

        let outcome = resets.request(&store, " Asha@Example.com").await.unwrap();
        assert_eq!(outcome, ResetOutcome::Sent);
        assert_eq!(tokens.tokens_for("u1").len(), 1);
        assert_eq!(mailer.sent.lock().unwrap()[0].0, "Asha@Example.com");
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Asha@Example.COM "), "asha@example.com");
    }
}
