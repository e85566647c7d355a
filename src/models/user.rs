//! Stored user credentials.

/// A registered user. The hash is an argon2 PHC string and is never sent to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
}
