use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a session token. Issued by the login collaborator once
/// the user has signed in, presented by the client in its `auth` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub sub: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session token expired")]
    Expired,
    #[error("session token invalid: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Resolve the signing secret: the configured string, or 32 random bytes when
/// none is configured. A generated secret lives only as long as the process.
pub fn session_secret(configured: &str) -> Vec<u8> {
    if configured.is_empty() {
        let key: [u8; 32] = rand::rng().random();
        tracing::info!("No session secret configured, generated an ephemeral one");
        key.to_vec()
    } else {
        configured.as_bytes().to_vec()
    }
}

/// Issue an HS256 session token for `user_id`, valid for `ttl_secs`.
pub fn issue_session_token(
    secret: &[u8],
    user_id: i64,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = SessionClaims {
        sub: user_id,
        iat: now,
        exp: now + ttl_secs,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Validate a session token and return its claims.
pub fn validate_session_token(secret: &[u8], token: &str) -> Result<SessionClaims, SessionError> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    decode::<SessionClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
            _ => SessionError::Invalid(e),
        })
}
