//! Auth extractor: username from a session token.

use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query};
use axum::http::{header::AUTHORIZATION, request::Parts, Uri};
use tracing::debug;

use crate::error::AppError;
use crate::handlers::http::AppState;

const BEARER_PREFIX: &str = "Bearer ";
const TOKEN_PARAM: &str = "token";

/// Extractor: authenticated username. The token comes from an
/// `Authorization: Bearer` header or, for browsers opening a WebSocket,
/// the `token` query parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser(pub String);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix(BEARER_PREFIX))
            .map(str::to_string);
        let token = header
            .or_else(|| query_token(&parts.uri))
            .ok_or_else(|| {
                debug!("rejected request: missing token");
                AppError::Auth("Missing session token".to_string())
            })?;
        let username = state.jwt_secret().validate(&token)?;
        Ok(AuthUser(username))
    }
}

fn query_token(uri: &Uri) -> Option<String> {
    let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.remove(TOKEN_PARAM).filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_of(uri: &str) -> Option<String> {
        query_token(&uri.parse::<Uri>().unwrap())
    }

    #[test]
    fn token_is_read_from_query() {
        assert_eq!(token_of("/ws?token=abc.def"), Some("abc.def".to_string()));
        assert_eq!(token_of("/ws?x=1&token=t"), Some("t".to_string()));
    }

    #[test]
    fn query_token_is_percent_decoded() {
        assert_eq!(token_of("/ws?token=abc%2Edef"), Some("abc.def".to_string()));
        assert_eq!(token_of("/ws?token=a%2Bb&x=%20"), Some("a+b".to_string()));
    }

    #[test]
    fn missing_or_empty_token() {
        assert_eq!(token_of("/ws"), None);
        assert_eq!(token_of("/ws?token="), None);
        assert_eq!(token_of("/ws?tokens=abc"), None);
    }
}
