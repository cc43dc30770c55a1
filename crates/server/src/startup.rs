use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use migration::MigratorTrait;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use service::repo::SeaOrmTenantRepository;

use crate::errors::StartupError;
use crate::routes;
use crate::state::AppState;

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

fn bind_addr(cfg: &configs::ServerConfig) -> Result<SocketAddr, StartupError> {
    format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .map_err(|e| StartupError::InvalidConfig(format!("server address: {e}")))
}

/// Router over an already constructed state; used by `run` and by tests.
pub fn app(state: AppState) -> Router {
    routes::build_router(state, build_cors())
}

/// Public entry: connect, migrate, build the app and serve until `shutdown`
/// resolves.
pub async fn run<F>(cfg: configs::AppConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let db = models::db::connect_with_config(&cfg.database).await?;
    migration::Migrator::up(&db, None).await?;
    info!("database migrated");

    let repo = Arc::new(SeaOrmTenantRepository::new(db));
    let state = AppState::new(repo, &cfg);

    // 定期清理已回满的令牌桶，避免按 IP 的状态无限增长
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let pruned = limiter.prune();
            if pruned > 0 {
                debug!(pruned, remaining = limiter.tracked(), "rate limit buckets pruned");
            }
        }
    });

    let sessions = state.sync.clone();
    info!(
        cache_path = %sessions.cache_path().display(),
        background_secs = sessions.policy().background_interval.as_secs(),
        max_retries = sessions.policy().backoff.max_retries,
        "sync sessions ready"
    );

    let app = app(state);
    let addr = bind_addr(&cfg.server)?;
    info!(%addr, "starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;
    let flushed = sessions.flush_all().await;
    info!(flushed, "server stopped");
    Ok(())
}
