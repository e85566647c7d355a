//! Authentication: signup, login, session tokens.

mod handlers;
mod jwt;
mod service;

pub use handlers::{login, signup, LoginRequest, SignupRequest, TokenResponse};
pub use jwt::{Claims, JwtSecret};
pub use service::AuthAppService;
