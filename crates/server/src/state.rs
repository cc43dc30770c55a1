use std::sync::Arc;
use std::time::Duration;

use service::auth::{AuthConfig, CredentialManager};
use service::hierarchy::HierarchyService;
use service::repository::TenantRepository;

use crate::rate_limit::RateLimiter;
use crate::sync_sessions::SyncSessions;

pub type Store = dyn TenantRepository;

/// Shared handler state. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub hierarchy: HierarchyService<Store>,
    pub credentials: CredentialManager<Store>,
    pub limiter: RateLimiter,
    pub sync: SyncSessions,
}

impl AppState {
    pub fn new(repo: Arc<Store>, cfg: &configs::AppConfig) -> Self {
        let credentials = CredentialManager::new(repo.clone(), AuthConfig::from_settings(&cfg.auth));
        let hierarchy = HierarchyService::new(
            repo,
            credentials.clone(),
            cfg.codes.max_attempts,
            Duration::from_millis(cfg.auth.op_timeout_ms),
        );
        let sync = SyncSessions::new(hierarchy.clone(), &cfg.cache, &cfg.sync);
        Self { hierarchy, credentials, limiter: RateLimiter::from_settings(&cfg.rate_limit), sync }
    }
}
