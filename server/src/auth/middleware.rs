use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use super::session::validate_session_token;

/// Session secret stored in request extensions for the SessionUser extractor.
#[derive(Clone)]
pub struct SessionSecret(pub Vec<u8>);

/// The caller's user id, taken from an optional `Authorization: Bearer` session
/// token. No header yields `SessionUser(None)`; a header carrying a bad token is
/// rejected with 401 so clients notice stale sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUser(pub Option<i64>);

impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(auth_header) = parts.headers.get("Authorization") else {
            return Ok(SessionUser(None));
        };

        let token = auth_header
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Set by the inject_session_secret middleware layer
        let secret = parts
            .extensions
            .get::<SessionSecret>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        let claims = validate_session_token(&secret.0, token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer session token");
            StatusCode::UNAUTHORIZED
        })?;

        Ok(SessionUser(Some(claims.sub)))
    }
}
