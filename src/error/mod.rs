//! Application error types shared by HTTP routes, event handlers and actors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::RoomId;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Hub is not running")]
    HubUnavailable,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Copy of this error for fan-out to several waiters; sources that cannot be
    /// cloned are flattened into their message.
    pub fn duplicate(&self) -> Self {
        match self {
            AppError::UserNotFound(u) => AppError::UserNotFound(u.clone()),
            AppError::RoomNotFound(id) => AppError::RoomNotFound(*id),
            AppError::Forbidden(msg) => AppError::Forbidden(msg.clone()),
            AppError::Validation(msg) => AppError::Validation(msg.clone()),
            AppError::HubUnavailable => AppError::HubUnavailable,
            other => AppError::Internal(anyhow::anyhow!("{}", other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Db(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {}", e),
            ),
            AppError::Serialization(e) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid payload: {}", e),
            ),
            AppError::MalformedPayload { .. } | AppError::UnsupportedEventType(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::TokenExpired | AppError::TokenInvalid => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            AppError::UserNotFound(_) | AppError::RoomNotFound(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::SessionClosed | AppError::HubUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", e),
            ),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
