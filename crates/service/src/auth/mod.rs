//! Session credentials: password check, signed token pairs, refresh and revocation.
//!
//! Tokens are stateless HS256 JWTs. Revocation works through a per-user
//! `session_version` that refresh tokens carry and `refresh` re-checks.

pub mod coalesce;
pub mod domain;
pub mod errors;
pub mod password;
pub mod service;
pub mod token;

pub use domain::{AccessToken, Claims, TokenKind, TokenPair};
pub use errors::AuthError;
pub use service::{AuthConfig, CredentialManager};
