//! Bearer credential verification.
//!
//! Two token kinds are accepted, signed with different HS256 secrets: access
//! tokens arrive inside an `auth` frame, refresh tokens arrive in the
//! `refreshToken` cookie of the upgrade request.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use tandem_types::api::Claims;

use crate::error::AuthError;

#[derive(Clone)]
pub struct CredentialVerifier {
    access_key: DecodingKey,
    refresh_key: DecodingKey,
    validation: Validation,
}

impl CredentialVerifier {
    pub fn new(access_secret: &str, refresh_secret: &str) -> Self {
        Self {
            access_key: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_key: DecodingKey::from_secret(refresh_secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Checks signature and expiry of a token from an `auth` frame.
    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.access_key, &self.validation)
            .map(|data| data.claims)
            .map_err(AuthError::InvalidToken)
    }

    /// Checks signature and expiry of a cookie-borne refresh token. Whether
    /// it has been revoked is a store lookup, done by the caller.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.refresh_key, &self.validation)
            .map(|data| data.claims)
            .map_err(AuthError::InvalidRefreshToken)
    }
}

/// SHA-256 hex digest under which refresh tokens are stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.trim().as_bytes()))
}

/// Signs a token for `user_id` valid for `ttl`.
pub fn issue_token(secret: &str, user_id: Uuid, ttl: chrono::Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
        email: None,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
