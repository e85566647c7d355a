//! HTTP handlers: shared state and health.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;

use crate::auth::JwtSecret;
use crate::db::ChatStore;
use crate::error::AppError;
use crate::services::{Dispatcher, HubHandle, PumpSettings};

/// Shared application state for HTTP and WS routes.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub store: Arc<dyn ChatStore>,
    pub jwt_secret: JwtSecret,
    pub dispatcher: Arc<Dispatcher>,
    pub pump: PumpSettings,
}

impl AppState {
    pub fn new(hub: HubHandle, store: Arc<dyn ChatStore>, jwt_secret: JwtSecret, pump: PumpSettings) -> Self {
        Self {
            hub,
            store,
            jwt_secret,
            dispatcher: Arc::new(Dispatcher::standard()),
            pump,
        }
    }
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }
    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }
    pub fn jwt_secret(&self) -> &JwtSecret {
        &self.jwt_secret
    }
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
    pub fn pump(&self) -> &PumpSettings {
        &self.pump
    }
}

/// GET /health — liveness check with registry counts.
pub async fn health(State(state): State<AppState>) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let stats = state.hub().stats().await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "parley",
            "sessions": stats.sessions,
            "users": stats.users,
            "rooms": stats.rooms,
        })),
    ))
}
