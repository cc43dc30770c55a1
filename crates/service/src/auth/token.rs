//! HS256 encoding and validation of [`Claims`].

use chrono::Utc;
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use super::domain::{Claims, TokenKind};
use super::errors::AuthError;
use crate::domain::User;

pub fn claims_for(user: &User, kind: TokenKind, issuer: &str, ttl_secs: u64) -> Claims {
    let now = Utc::now().timestamp();
    Claims {
        sub: user.id,
        role: user.role,
        kind,
        bid: user.business_id.clone(),
        ver: user.session_version,
        iss: issuer.to_string(),
        iat: now,
        exp: now + ttl_secs as i64,
        jti: Uuid::new_v4().to_string(),
    }
}

pub fn encode(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AuthError::Crypto(format!("JWT encode: {e}")))
}

/// Check signature, expiry, issuer and that the token is of `expected` kind.
pub fn decode(token: &str, secret: &str, issuer: &str, expected: TokenKind) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[issuer]);
    validation.set_required_spec_claims(&["sub", "exp", "iat", "iss"]);
    validation.leeway = 0;

    let claims = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::TokenInvalid(e.to_string()),
        })?;
    if claims.kind != expected {
        return Err(AuthError::TokenInvalid(format!("expected {expected:?} token")));
    }
    Ok(claims)
}
