use thiserror::Error;

use crate::repository::StoreError;

/// Credential failures. Callers re-authenticate, or refresh exactly once on
/// `TokenExpired`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token: {0}")]
    TokenInvalid(String),
    #[error("session revoked")]
    Revoked,
    #[error("account inactive")]
    Inactive,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("repository error: {0}")]
    Repository(String),
}

impl AuthError {
    /// Stable code for external mapping/logging
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "InvalidCredentials",
            AuthError::TokenExpired => "TokenExpired",
            AuthError::TokenInvalid(_) => "TokenInvalid",
            AuthError::Revoked => "SessionRevoked",
            AuthError::Inactive => "AccountInactive",
            AuthError::Validation(_) => "ValidationError",
            AuthError::Unavailable(_) => "AuthUnavailable",
            AuthError::Crypto(_) => "CryptoError",
            AuthError::Repository(_) => "AuthRepositoryError",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(why) => AuthError::Unavailable(why),
            other => AuthError::Repository(other.to_string()),
        }
    }
}
