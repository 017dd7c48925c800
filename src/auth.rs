//! Password hashing, bearer tokens and the authenticated-user extractor.
//!
//! Passwords are stored as Argon2id PHC strings. Tokens are HS256 JWTs whose
//! `sub` is the username and whose `exp` is `token_expire_minutes` after
//! issue. Handlers that need a caller take a [`CurrentUser`] argument; a
//! missing, malformed or expired token, or a token for a deleted user, is
//! rejected with 401 and `WWW-Authenticate: Bearer`.

use anyhow::{anyhow, Result};
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::User;
use crate::server::AppState;
use crate::users;

const CREDENTIALS_ERROR: &str = "Could not validate credentials";

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("password hashing failed: {}", e))
}

pub fn verify_password(password: &str, hashed: &str) -> bool {
    PasswordHash::new(hashed)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

pub fn create_token(secret: &str, username: &str, expire_minutes: i64) -> Result<String> {
    let exp = chrono::Utc::now() + chrono::Duration::minutes(expire_minutes);
    let claims = Claims {
        sub: username.to_string(),
        exp: exp.timestamp(),
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// The user identified by the request's bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.strip_prefix("Bearer ")
                    .or_else(|| v.strip_prefix("bearer "))
            })
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized(CREDENTIALS_ERROR))?;

        let claims = decode_token(&state.config.auth.secret, token).map_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
            ApiError::unauthorized(CREDENTIALS_ERROR)
        })?;

        let user = users::find_by_username(&state.pool, &claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized(CREDENTIALS_ERROR))?;

        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_roundtrip() {
        let hashed = hash_password("hunter2").unwrap();
        assert_ne!(hashed, "hunter2");
        assert!(verify_password("hunter2", &hashed));
        assert!(!verify_password("hunter3", &hashed));
    }

    #[test]
    fn test_garbage_hash_does_not_verify() {
        assert!(!verify_password("x", "not-a-phc-string"));
    }

    #[test]
    fn test_token_carries_username() {
        let token = create_token("secret", "ada", 30).unwrap();
        let claims = decode_token("secret", &token).unwrap();
        assert_eq!(claims.sub, "ada");
        assert!(claims.exp > chrono::Utc::now().timestamp());
    }

    #[test]
    fn test_token_rejected_with_wrong_secret_or_expired() {
        let token = create_token("secret", "ada", 30).unwrap();
        assert!(decode_token("other", &token).is_err());

        let expired = create_token("secret", "ada", -10).unwrap();
        assert!(decode_token("secret", &expired).is_err());
    }
}
