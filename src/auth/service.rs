//! Credential checks: password hashing and signup field rules.

use crate::error::{AppError, AppResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

pub struct AuthAppService;

impl AuthAppService {
    pub fn hash_password(password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("hash: {}", e)))?
            .to_string();
        Ok(hash)
    }

    pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
        let parsed =
            PasswordHash::new(hash).map_err(|e| AppError::Internal(anyhow::anyhow!("parse hash: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// Usernames appear in synthesized room names, so they may not contain
    /// whitespace or commas.
    pub fn validate_username(username: &str) -> AppResult<()> {
        if username
            .chars()
            .any(|c| c.is_whitespace() || c == ',' || c.is_control())
        {
            return Err(AppError::Validation(
                "Username may not contain whitespace or commas".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_password() {
        let hash = AuthAppService::hash_password("mypassword").unwrap();
        assert!(AuthAppService::verify_password("mypassword", &hash).unwrap());
        assert!(!AuthAppService::verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn hash_is_not_the_password() {
        let hash = AuthAppService::hash_password("mypassword").unwrap();
        assert!(!hash.contains("mypassword"));
    }

    #[test]
    fn validate_username_accepts_plain_names() {
        assert!(AuthAppService::validate_username("alice").is_ok());
        assert!(AuthAppService::validate_username("bob_42").is_ok());
    }

    #[test]
    fn validate_username_rejects_separators() {
        assert!(AuthAppService::validate_username("al ice").is_err());
        assert!(AuthAppService::validate_username("a,b").is_err());
    }
}
