//! Auth HTTP handlers: signup, login.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::auth::AuthAppService;
use crate::error::AppError;
use crate::handlers::http::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 32))]
    pub username: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    body.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    AuthAppService::validate_username(&body.username)?;

    if state.store().find_user(&body.username).await?.is_some() {
        return Err(AppError::Conflict("Username already taken".to_string()));
    }

    let password_hash = AuthAppService::hash_password(&body.password)?;
    state.store().create_user(&body.username, &password_hash).await?;
    let token = state.jwt_secret().issue(&body.username)?;
    info!(username = %body.username, "user signed up");

    Ok(Json(TokenResponse { token }))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let user = state
        .store()
        .find_user(&body.username)
        .await?
        .ok_or_else(|| AppError::Auth("Invalid username or password".to_string()))?;

    if !AuthAppService::verify_password(&body.password, &user.password_hash)? {
        return Err(AppError::Auth("Invalid username or password".to_string()));
    }

    let token = state.jwt_secret().issue(&user.username)?;

    Ok(Json(TokenResponse { token }))
}
