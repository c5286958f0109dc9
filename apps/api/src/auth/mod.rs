//! Caller identity. Tokens are issued by the external identity provider;
//! this module only verifies them and resolves the caller's profile.

pub mod reset;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::errors::AppError;
use crate::models::user::UserProfile;
use crate::state::AppState;
use crate::store::{self, DocumentStore, USERS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub uid: String,
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError>;
}

/// HS256 JWT verification against a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("Token rejected: {e}");
            AuthError::InvalidToken
        })?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(VerifiedToken {
            uid: data.claims.sub,
        })
    }
}

/// Extracted from `Authorization: Bearer <token>`; rejects with 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Auth(AuthError::MissingToken))?;

        let verified = state.tokens.verify(bearer.token())?;
        Ok(AuthUser { uid: verified.uid })
    }
}

/// Loads the caller's profile, which carries their role.
pub async fn load_profile(
    store: &dyn DocumentStore,
    uid: &str,
) -> Result<Option<UserProfile>, store::StoreError> {
    store::get_as::<UserProfile>(store, USERS, uid).await
}

#[cfg(test)]
pub fn sign_for_tests(secret: &str, uid: &str, ttl_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    let exp = (chrono::Utc::now().timestamp() + ttl_secs).max(0) as usize;
    encode(
        &Header::new(Algorithm::HS256),
        &Claims {
            sub: uid.to_string(),
            exp,
        },
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token encodes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_token_yields_uid() {
        let verifier = JwtVerifier::new("secret");
        let token = sign_for_tests("secret", "intern-1", 600);
        assert_eq!(
            verifier.verify(&token),
            Ok(VerifiedToken {
                uid: "intern-1".to_string()
            })
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = JwtVerifier::new("secret");
        let token = sign_for_tests("other", "intern-1", 600);
        assert_eq!(verifier.verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = JwtVerifier::new("secret");
        let token = sign_for_tests("secret", "intern-1", -3600);
        assert_eq!(verifier.verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_garbage_rejected() {
        let verifier = JwtVerifier::new("secret");
        assert_eq!(verifier.verify("not.a.jwt"), Err(AuthError::InvalidToken));
    }
}
