//! Authentication middleware and JWT verification

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::app::AppState;
use crate::store::PlayerId;
use crate::util::time::unix_millis;

type HmacSha256 = Hmac<Sha256>;

/// `sub` claim; the auth service emits the user id as a number or a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subject {
    Number(i64),
    Text(String),
}

/// JWT claims issued by the auth service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: Subject,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
    #[serde(default)]
    pub username: Option<String>,
}

impl JwtClaims {
    pub fn player_id(&self) -> Result<PlayerId, AuthError> {
        let id = match &self.sub {
            Subject::Number(id) => *id,
            Subject::Text(text) => text.parse().map_err(|_| AuthError::InvalidSubject)?,
        };
        // 0 is reserved for the AI
        if id <= 0 {
            return Err(AuthError::InvalidSubject);
        }
        Ok(id)
    }
}

#[derive(Deserialize)]
struct JwtHeader {
    alg: String,
}

/// Verify an HS256 token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    let header: JwtHeader = URL_SAFE_NO_PAD
        .decode(header_b64)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or(AuthError::InvalidToken)?;
    if header.alg != "HS256" {
        return Err(AuthError::InvalidToken);
    }

    // Verify signature (HMAC-SHA256)
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    // Decode payload
    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: JwtClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < unix_millis() / 1000 {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Verify a token and return the player it was issued for
pub fn authenticate(token: &str, secret: &str) -> Result<PlayerId, AuthError> {
    verify_jwt(token, secret)?.player_id()
}

/// Extract JWT from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization header format")]
    InvalidFormat,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token subject is not a player id")]
    InvalidSubject,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": "UNAUTHORIZED",
        });

        (status, Json(body)).into_response()
    }
}

/// Authenticated user extractor result
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub player_id: PlayerId,
    pub claims: JwtClaims,
}

/// Middleware to require authentication
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;

    let token = extract_bearer_token(auth_header).ok_or(AuthError::InvalidFormat)?;

    let claims = verify_jwt(token, &state.config.jwt_secret)?;

    let auth_user = AuthenticatedUser {
        player_id: claims.player_id()?,
        claims,
    };

    // Insert into request extensions for handlers to access
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}


#[cfg(test)]
mod tests {
    use super::test_support::{sign, token_for};
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-secret";

    #[test]
    fn valid_token_yields_player() {
        assert_eq!(authenticate(&token_for(42, SECRET), SECRET).unwrap(), 42);
    }

    #[test]
    fn numeric_subject_is_accepted() {
        let token = sign(&json!({"sub": 7, "exp": u64::MAX / 2}), SECRET);
        assert_eq!(authenticate(&token, SECRET).unwrap(), 7);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = token_for(42, SECRET);
        assert!(matches!(
            verify_jwt(&token, "other"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign(&json!({"sub": "42", "exp": 1}), SECRET);
        assert!(matches!(
            verify_jwt(&token, SECRET),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn non_numeric_or_reserved_subject_is_rejected() {
        for sub in [json!("abc"), json!(0), json!("-3")] {
            let token = sign(&json!({"sub": sub, "exp": u64::MAX / 2}), SECRET);
            assert!(matches!(
                authenticate(&token, SECRET),
                Err(AuthError::InvalidSubject)
            ));
        }
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for token in ["", "a.b", "a.b.c.d", "not.a.token"] {
            assert!(verify_jwt(token, SECRET).is_err());
        }
    }

    #[test]
    fn bearer_prefix() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }
}
