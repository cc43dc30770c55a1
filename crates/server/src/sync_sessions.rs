use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, info};
use uuid::Uuid;

use service::authz::Actor;
use service::cache::JsonFileCache;
use service::errors::ServiceError;
use service::hierarchy::HierarchyService;
use service::session::SessionContext;
use service::sync::{SyncPolicy, SyncReconciler};

use crate::state::Store;

pub type Reconciler = SyncReconciler<Store>;

/// One reconciler per signed-in user, each backed by its own cache file
/// next to the configured `cache.path`.
#[derive(Clone)]
pub struct SyncSessions {
    hierarchy: HierarchyService<Store>,
    policy: SyncPolicy,
    cache_path: PathBuf,
    sessions: Arc<DashMap<Uuid, Arc<Reconciler>>>,
}

impl SyncSessions {
    pub fn new(hierarchy: HierarchyService<Store>, cache: &configs::CacheSettings, sync: &configs::SyncSettings) -> Self {
        Self {
            hierarchy,
            policy: SyncPolicy::from_settings(sync),
            cache_path: PathBuf::from(&cache.path),
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn policy(&self) -> &SyncPolicy { &self.policy }

    pub fn cache_path(&self) -> &Path { &self.cache_path }

    /// `data/local_cache.json` becomes `data/local_cache.<user>.json`.
    pub fn cache_path_for(&self, user_id: Uuid) -> PathBuf {
        per_user_path(&self.cache_path, user_id)
    }

    /// The caller's reconciler, opened on first use with the selection it
    /// left behind in its cache file.
    pub async fn attach(&self, actor: &Actor) -> Result<Arc<Reconciler>, ServiceError> {
        if let Some(existing) = self.sessions.get(&actor.user_id).map(|s| s.value().clone()) {
            existing.refresh_actor(actor.clone());
            return Ok(existing);
        }
        let cache = JsonFileCache::open(self.cache_path_for(actor.user_id)).await?;
        let fresh = Arc::new(SyncReconciler::new(
            self.hierarchy.clone(),
            Arc::new(cache),
            SessionContext::new(actor.clone()),
            self.policy.clone(),
        ));
        // 并发首次访问时以先插入者为准
        let reconciler = self.sessions.entry(actor.user_id).or_insert_with(|| fresh.clone()).clone();
        if Arc::ptr_eq(&reconciler, &fresh) {
            reconciler.restore_session().await;
            info!(user_id = %actor.user_id, "sync session attached");
        }
        Ok(reconciler)
    }

    /// Drop the user's session and purge its cache.
    pub async fn detach(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        let Some((_, reconciler)) = self.sessions.remove(&user_id) else {
            return Ok(false);
        };
        reconciler.sign_out().await?;
        info!(user_id = %user_id, "sync session detached");
        Ok(true)
    }

    pub fn active(&self) -> usize { self.sessions.len() }

    /// Best-effort push of every session's pending edits on shutdown.
    pub async fn flush_all(&self) -> usize {
        let sessions: Vec<Arc<Reconciler>> = self.sessions.iter().map(|s| s.value().clone()).collect();
        let flushed = join_all(sessions.iter().map(|s| s.flush_pending())).await.into_iter().filter(|f| *f).count();
        debug!(flushed, sessions = sessions.len(), "sync sessions flushed");
        flushed
    }
}

fn per_user_path(base: &Path, user_id: Uuid) -> PathBuf {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("local_cache");
    let name = match base.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}.{user_id}.{ext}"),
        None => format!("{stem}.{user_id}"),
    };
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_files_are_per_user() {
        let id = Uuid::nil();
        assert_eq!(
            per_user_path(Path::new("data/local_cache.json"), id),
            PathBuf::from(format!("data/local_cache.{id}.json"))
        );
        assert_eq!(per_user_path(Path::new("cache"), id), PathBuf::from(format!("cache.{id}")));
    }
}
