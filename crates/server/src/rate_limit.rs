use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::errors::ApiError;
use crate::state::AppState;

/// Paths that accept a password. Only these share the strict budget.
const CREDENTIAL_PATHS: &[&str] = &["/auth/login"];

/// Budget class of a route. Credential endpoints get the stricter one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Auth,
    Api,
}

impl RouteClass {
    pub fn of_path(path: &str) -> Self {
        let path = path.trim_end_matches('/');
        if CREDENTIAL_PATHS.contains(&path) { RouteClass::Auth } else { RouteClass::Api }
    }
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u64, per_minute: u64) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_rate: per_minute as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or report how long until one is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            debug!(remaining = self.tokens, "token acquired");
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate.max(f64::EPSILON)))
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn is_full(&mut self) -> bool {
        self.refill();
        self.tokens >= self.capacity
    }
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    per_minute: u64,
    burst: u64,
}

/// Token buckets keyed by route class and client address.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<DashMap<(RouteClass, IpAddr), TokenBucket>>,
    auth: Budget,
    api: Budget,
    enabled: bool,
}

impl RateLimiter {
    pub fn from_settings(s: &configs::RateLimitSettings) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            auth: Budget { per_minute: s.auth_per_minute, burst: s.auth_burst },
            api: Budget { per_minute: s.api_per_minute, burst: s.api_burst },
            enabled: s.enabled,
        }
    }

    pub fn check(&self, class: RouteClass, client: IpAddr) -> Result<(), Duration> {
        if !self.enabled {
            return Ok(());
        }
        let budget = match class {
            RouteClass::Auth => self.auth,
            RouteClass::Api => self.api,
        };
        self.buckets
            .entry((class, client))
            .or_insert_with(|| TokenBucket::new(budget.burst, budget.per_minute))
            .try_acquire()
    }

    /// Drop buckets that have refilled completely; they carry no state.
    pub fn prune(&self) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_full());
        before - self.buckets.len()
    }

    pub fn tracked(&self) -> usize { self.buckets.len() }
}

/// Peer address, falling back to the first `X-Forwarded-For` hop when the
/// server was not started with connect info.
fn client_ip(req: &Request) -> IpAddr {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let class = RouteClass::of_path(req.uri().path());
    let client = client_ip(&req);
    if let Err(wait) = state.limiter.check(class, client) {
        warn!(client = %client, class = ?class, path = %req.uri().path(), "rate limit exceeded");
        return Err(ApiError::RateLimited { retry_after_secs: wait.as_secs().max(1) });
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> configs::RateLimitSettings {
        configs::RateLimitSettings { enabled: true, auth_per_minute: 5, auth_burst: 5, api_per_minute: 120, api_burst: 60 }
    }

    #[test]
    fn bucket_drains_then_reports_wait() {
        let mut bucket = TokenBucket::new(2, 60);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1, 600); // 10 per second
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(bucket.try_acquire().is_ok());
    }

    #[test]
    fn auth_class_is_stricter_and_per_client() {
        let limiter = RateLimiter::from_settings(&settings());
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        for _ in 0..5 {
            assert!(limiter.check(RouteClass::Auth, a).is_ok());
        }
        assert!(limiter.check(RouteClass::Auth, a).is_err());
        assert!(limiter.check(RouteClass::Auth, b).is_ok());
        assert!(limiter.check(RouteClass::Api, a).is_ok());
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let limiter = RateLimiter::from_settings(&configs::RateLimitSettings { enabled: false, ..settings() });
        let ip: IpAddr = "10.0.0.3".parse().unwrap();
        for _ in 0..100 {
            assert!(limiter.check(RouteClass::Auth, ip).is_ok());
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn only_credential_endpoints_are_strict() {
        assert_eq!(RouteClass::of_path("/auth/login"), RouteClass::Auth);
        assert_eq!(RouteClass::of_path("/auth/login/"), RouteClass::Auth);
        // session upkeep stays on the general budget
        assert_eq!(RouteClass::of_path("/auth/me"), RouteClass::Api);
        assert_eq!(RouteClass::of_path("/auth/refresh"), RouteClass::Api);
        assert_eq!(RouteClass::of_path("/auth/logout"), RouteClass::Api);
        assert_eq!(RouteClass::of_path("/businesses"), RouteClass::Api);
        assert_eq!(RouteClass::of_path("/authors"), RouteClass::Api);
    }
}
