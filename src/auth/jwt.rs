//! Session token issue and validation.

use crate::error::{AppError, AppResult};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,   // username
    pub exp: i64,
    pub iat: i64,
}

#[derive(Clone)]
pub struct JwtSecret {
    secret: String,
    ttl: Duration,
}

impl JwtSecret {
    /// Tokens expire ten minutes after issue.
    pub fn new(secret: String) -> Self {
        Self::with_ttl(secret, Duration::minutes(10))
    }

    pub fn with_ttl(secret: String, ttl: Duration) -> Self {
        Self { secret, ttl }
    }

    pub fn issue(&self, username: &str) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: username.to_string(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("jwt encode: {}", e)))
    }

    /// Returns the username the token was issued to.
    pub fn validate(&self, token: &str) -> AppResult<String> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.leeway = 0;
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppError::TokenExpired,
            _ => AppError::TokenInvalid,
        })?;
        if data.claims.sub.is_empty() {
            return Err(AppError::TokenInvalid);
        }
        Ok(data.claims.sub)
    }
}
