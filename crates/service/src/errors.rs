use thiserror::Error;

use crate::auth::errors::AuthError;
use crate::authz::DenyReason;
use crate::codes::CodeScope;
use crate::repository::StoreError;

/// Error taxonomy shared by every tenant operation.
///
/// Only `RemoteUnavailable` is ever retried automatically.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("authorization denied: {0}")]
    Denied(DenyReason),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{scope} code space exhausted after {attempts} attempts")]
    CodeExhaustion { scope: CodeScope, attempts: u32 },
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn not_found(entity: &str) -> Self { Self::NotFound(format!("{} not found", entity)) }

    /// Stable machine-checkable code. Denials report their reason.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "ValidationError",
            ServiceError::Auth(e) => e.code(),
            ServiceError::Denied(reason) => reason.as_str(),
            ServiceError::NotFound(_) => "NotFound",
            ServiceError::Conflict(_) => "Conflict",
            ServiceError::CodeExhaustion { .. } => "CodeExhaustion",
            ServiceError::RemoteUnavailable(_) => "RemoteUnavailable",
            ServiceError::Internal(_) => "InternalError",
        }
    }

    /// HTTP status the API layer maps this error to.
    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::Auth(_) => 401,
            ServiceError::Denied(_) => 403,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::RemoteUnavailable(_) => 503,
            ServiceError::CodeExhaustion { .. } | ServiceError::Internal(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::RemoteUnavailable(_))
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::Conflict(what) => ServiceError::Conflict(what),
            StoreError::Unavailable(why) => ServiceError::RemoteUnavailable(why),
            StoreError::Backend(why) => ServiceError::Internal(why),
        }
    }
}

impl From<models::errors::ModelError> for ServiceError {
    fn from(e: models::errors::ModelError) -> Self {
        match e {
            models::errors::ModelError::Validation(msg) => ServiceError::Validation(msg),
            models::errors::ModelError::Conflict(msg) => ServiceError::Conflict(msg),
            models::errors::ModelError::Unavailable(msg) => ServiceError::RemoteUnavailable(msg),
            models::errors::ModelError::Db(msg) => ServiceError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_code_is_reason() {
        let e = ServiceError::Denied(DenyReason::CrossTenantAccess);
        assert_eq!(e.code(), "CrossTenantAccess");
        assert_eq!(e.status(), 403);
        assert!(!e.is_retryable());
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        assert_eq!(ServiceError::from(StoreError::Unavailable("down".into())).code(), "RemoteUnavailable");
        assert!(ServiceError::from(StoreError::Unavailable("down".into())).is_retryable());
        assert_eq!(ServiceError::from(StoreError::Conflict("dup".into())).status(), 409);
        assert_eq!(ServiceError::from(StoreError::NotFound("x".into())).status(), 404);
    }

    #[test]
    fn exhaustion_is_operator_visible() {
        let e = ServiceError::CodeExhaustion { scope: CodeScope::Connection, attempts: 50 };
        assert_eq!(e.status(), 500);
        assert!(e.to_string().contains("50 attempts"));
    }
}
