//! Short human-enterable identifiers reserved against the tenant store.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::NUMERIC_CODE_LEN;
use crate::errors::ServiceError;
use crate::repository::TenantRepository;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 50;
const BUSINESS_PREFIX_LEN: usize = 4;
const FALLBACK_PREFIX: &str = "BIZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeScope {
    Business,
    Connection,
}

impl CodeScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeScope::Business => "business",
            CodeScope::Connection => "connection",
        }
    }
}

impl fmt::Display for CodeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run `attempt` until it yields a value, at most `max_attempts` times.
///
/// `Ok(None)` means "collision, try again"; errors abort immediately.
/// Running out of attempts is reported as `CodeExhaustion`.
pub async fn retry_with_ceiling<T, F, Fut>(max_attempts: u32, scope: CodeScope, mut attempt: F) -> Result<T, ServiceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, ServiceError>>,
{
    for n in 1..=max_attempts {
        if let Some(value) = attempt(n).await? {
            return Ok(value);
        }
        debug!(scope = %scope, attempt = n, "code collision");
    }
    warn!(scope = %scope, attempts = max_attempts, "code space exhausted");
    Err(ServiceError::CodeExhaustion { scope, attempts: max_attempts })
}

/// Alphabetic prefix derived from a business name, e.g. "Test Café" -> "TEST".
pub fn business_prefix(seed: &str) -> String {
    let prefix: String = seed
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(BUSINESS_PREFIX_LEN)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if prefix.is_empty() { FALLBACK_PREFIX.to_string() } else { prefix }
}

fn random_digits(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect()
}

/// Reserves business and connection codes through the store's
/// create-if-absent gate, so two concurrent generators never share a code.
pub struct CodeGenerator<R: TenantRepository + ?Sized> {
    repo: Arc<R>,
    max_attempts: u32,
}

impl<R: TenantRepository + ?Sized> Clone for CodeGenerator<R> {
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone(), max_attempts: self.max_attempts }
    }
}

impl<R: TenantRepository + ?Sized> CodeGenerator<R> {
    pub fn new(repo: Arc<R>, max_attempts: u32) -> Self {
        Self { repo, max_attempts: max_attempts.max(1) }
    }

    pub fn max_attempts(&self) -> u32 { self.max_attempts }

    /// Name prefix plus a random four digit suffix, e.g. `TEST4821`.
    pub async fn generate_business_code(&self, seed_name: &str) -> Result<String, ServiceError> {
        let prefix = business_prefix(seed_name);
        retry_with_ceiling(self.max_attempts, CodeScope::Business, |_| {
            let candidate = format!("{}{}", prefix, random_digits(4));
            self.reserve(CodeScope::Business, candidate)
        })
        .await
    }

    /// Four random digits. Legacy alphanumeric codes are never generated.
    pub async fn generate_connection_code(&self) -> Result<String, ServiceError> {
        retry_with_ceiling(self.max_attempts, CodeScope::Connection, |_| {
            let candidate = random_digits(NUMERIC_CODE_LEN);
            self.reserve(CodeScope::Connection, candidate)
        })
        .await
    }

    async fn reserve(&self, scope: CodeScope, candidate: String) -> Result<Option<String>, ServiceError> {
        if self.repo.reserve_code(scope, &candidate).await? {
            Ok(Some(candidate))
        } else {
            Ok(None)
        }
    }
}
