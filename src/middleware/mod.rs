//! Request extractors shared by HTTP and WebSocket routes.

pub mod auth;

pub use auth::AuthUser;
