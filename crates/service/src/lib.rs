//! Service layer for the POS tenant hierarchy.
//! - `repository` defines the store seam; `repo` holds the PostgreSQL store.
//! - `hierarchy` applies authorization, code generation and credentials on top of it.
//! - `sync` keeps a session's local cache consistent with the store.

pub mod errors;
pub mod domain;
pub mod repository;
pub mod repo;
pub mod codes;
pub mod auth;
pub mod authz;
pub mod hierarchy;
pub mod cache;
pub mod session;
pub mod sync;
