//! Real-time chat backend built with Rust.
//!
//! Users sign up and log in over HTTP, then open a WebSocket. Every
//! connection, room and the process-wide registry run as their own tokio
//! tasks and talk only through channels.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::AppError;
pub use handlers::http::AppState;
pub use services::{Hub, HubHandle};

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use handlers::http;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router (ws, health, auth). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    let auth_routes = axum::Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login));

    axum::Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/health", get(http::health))
        .nest("/auth", auth_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for browser clients: the configured origin, or any origin when unset.
pub fn cors_layer(allowed_origin: Option<&str>) -> Result<CorsLayer, AppError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    match allowed_origin {
        Some(origin) => {
            let origin: HeaderValue = origin
                .parse()
                .map_err(|_| AppError::Config(format!("invalid ALLOWED_ORIGIN: {}", origin)))?;
            Ok(layer.allow_origin(origin))
        }
        None => Ok(layer.allow_origin(Any)),
    }
}
