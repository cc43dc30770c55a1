use anyhow::Result;
use serde::Deserialize;
use anyhow::anyhow;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub codes: CodeSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 8080, worker_threads: Some(4) }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 30 }
fn default_acquire_timeout() -> u64 { 30 }

/// Session credential settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    /// HS256 signing secret; filled from `JWT_SECRET` when empty.
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
    /// Upper bound for every store round-trip made while verifying or refreshing.
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
}

fn default_issuer() -> String { "pos-admin".into() }
fn default_access_ttl() -> u64 { 3600 }
fn default_refresh_ttl() -> u64 { 30 * 24 * 3600 }
fn default_op_timeout_ms() -> u64 { 5_000 }
fn default_min_password_len() -> usize { 8 }

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            issuer: default_issuer(),
            access_ttl_secs: default_access_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
            op_timeout_ms: default_op_timeout_ms(),
            min_password_len: default_min_password_len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 { 50 }

impl Default for CodeSettings {
    fn default() -> Self { Self { max_attempts: default_max_attempts() } }
}

/// Reconciler timing. Intervals are picked by session activity.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_background_secs")]
    pub background_interval_secs: u64,
    #[serde(default = "default_focused_secs")]
    pub focused_interval_secs: u64,
    #[serde(default = "default_editing_secs")]
    pub editing_interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

fn default_background_secs() -> u64 { 30 }
fn default_focused_secs() -> u64 { 15 }
fn default_editing_secs() -> u64 { 10 }
fn default_max_retries() -> u32 { 5 }
fn default_backoff_base_ms() -> u64 { 500 }
fn default_backoff_max_ms() -> u64 { 30_000 }

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            background_interval_secs: default_background_secs(),
            focused_interval_secs: default_focused_secs(),
            editing_interval_secs: default_editing_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

/// Token bucket budgets per client. Auth endpoints get the stricter one.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_auth_per_minute")]
    pub auth_per_minute: u64,
    #[serde(default = "default_auth_burst")]
    pub auth_burst: u64,
    #[serde(default = "default_api_per_minute")]
    pub api_per_minute: u64,
    #[serde(default = "default_api_burst")]
    pub api_burst: u64,
}

fn default_enabled() -> bool { true }
fn default_auth_per_minute() -> u64 { 5 }
fn default_auth_burst() -> u64 { 5 }
fn default_api_per_minute() -> u64 { 120 }
fn default_api_burst() -> u64 { 60 }

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            auth_per_minute: default_auth_per_minute(),
            auth_burst: default_auth_burst(),
            api_per_minute: default_api_per_minute(),
            api_burst: default_api_burst(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_path")]
    pub path: String,
}

fn default_cache_path() -> String { "data/local_cache.json".into() }

impl Default for CacheSettings {
    fn default() -> Self { Self { path: default_cache_path() } }
}

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    load_from_str(&content)
}

pub fn load_from_str(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    /// Load `config.toml` (or `CONFIG_PATH`); a missing file yields defaults
    /// so that environment variables alone can drive the process.
    pub fn load_and_validate() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut cfg = load_default().unwrap_or_default();
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        // 归一化 server
        self.server.normalize()?;
        // 归一化 database（支持从环境变量填充 URL）
        self.database.normalize_from_env();
        self.database.validate()?;
        self.auth.normalize_from_env();
        self.auth.validate()?;
        self.codes.validate()?;
        self.sync.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be within 1..=65535"));
        }
        match self.worker_threads {
            Some(0) | None => self.worker_threads = Some(4),
            Some(_) => {}
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn normalize_from_env(&mut self) {
        // 若 TOML 中未提供 URL，则尝试从环境变量填充
        if self.url.trim().is_empty() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                self.url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("database.url is empty; set it in config.toml or DATABASE_URL"));
        }
        let lower = self.url.to_lowercase();
        if !(lower.starts_with("postgresql://") || lower.starts_with("postgres://")) {
            return Err(anyhow!("database.url must start with postgresql:// or postgres://"));
        }
        if self.min_connections == 0 {
            return Err(anyhow!("database.min_connections must be >= 1"));
        }
        if self.max_connections < self.min_connections {
            return Err(anyhow!("database.max_connections must be >= min_connections"));
        }
        if self.connect_timeout_secs == 0 || self.acquire_timeout_secs == 0 {
            return Err(anyhow!("database timeouts must be positive seconds"));
        }
        Ok(())
    }
}

impl AuthSettings {
    pub fn normalize_from_env(&mut self) {
        if self.jwt_secret.trim().is_empty() {
            if let Ok(secret) = std::env::var("JWT_SECRET") {
                self.jwt_secret = secret;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.len() < 16 {
            return Err(anyhow!("auth.jwt_secret must be at least 16 bytes (or set JWT_SECRET)"));
        }
        if self.access_ttl_secs == 0 || self.refresh_ttl_secs <= self.access_ttl_secs {
            return Err(anyhow!("auth.refresh_ttl_secs must exceed a non-zero access_ttl_secs"));
        }
        if self.op_timeout_ms == 0 {
            return Err(anyhow!("auth.op_timeout_ms must be positive"));
        }
        Ok(())
    }
}

impl CodeSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("codes.max_attempts must be >= 1"));
        }
        Ok(())
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        if self.editing_interval_secs == 0 || self.focused_interval_secs == 0 || self.background_interval_secs == 0 {
            return Err(anyhow!("sync intervals must be positive"));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(anyhow!("sync.backoff_max_ms must be >= backoff_base_ms"));
        }
        if self.op_timeout_ms == 0 {
            return Err(anyhow!("sync.op_timeout_ms must be positive"));
        }
        Ok(())
    }
}

impl RateLimitSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.auth_per_minute == 0 || self.api_per_minute == 0 {
            return Err(anyhow!("rate_limit budgets must be positive"));
        }
        if self.auth_per_minute >= self.api_per_minute {
            return Err(anyhow!("rate_limit.auth_per_minute must be stricter than api_per_minute"));
        }
        Ok(())
    }
}
