//! Reconciles the local cache with the tenant store.
//!
//! A cycle goes `Idle -> Syncing -> Succeeded | Failed`. At most one cycle
//! runs at a time; triggers and callers that arrive while one is running
//! collapse into a single follow-up cycle.
//!
//! Per cached key the rule is: a pending local edit is pushed only if it was
//! staged against the version the store still holds. Only store timestamps
//! are compared, never the local clock. When the store moved on in the
//! meantime the remote copy wins, overwrites the cache and the cycle reports
//! a conflict. Entries the session may no longer see are purged.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::authz::Actor;
use crate::cache::{CachedRecord, LocalCache, LocalKey};
use crate::domain::{Business, BusinessPatch, Property, PropertyPatch};
use crate::errors::ServiceError;
use crate::hierarchy::HierarchyService;
use crate::repository::TenantRepository;
use crate::session::SessionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    Reconnect,
    FocusRegained,
    Timer,
    LocalMutation,
    Teardown,
}

/// What the session is doing; picks the periodic interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncActivity {
    Background,
    Focused,
    /// An edit form for a tenant entity is open.
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Succeeded,
    Failed { retryable: bool },
}

/// Snapshot published after every state change, readable without locking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_trigger: Option<SyncTrigger>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Retries ran out; local and remote state may disagree until the next
    /// successful cycle.
    pub out_of_sync: bool,
    pub last_error: Option<&'static str>,
    pub cycles: u64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            last_trigger: None,
            last_success_at: None,
            consecutive_failures: 0,
            out_of_sync: false,
            last_error: None,
            cycles: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl BackoffPolicy {
    /// `base * 2^(attempt-1)`, capped at `max`. Attempt 0 waits nothing.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u64.saturating_pow(attempt - 1);
        let ms = (self.base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(ms.min(self.max.as_millis() as u64))
    }
}

#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub background_interval: Duration,
    pub focused_interval: Duration,
    pub editing_interval: Duration,
    pub backoff: BackoffPolicy,
    /// Bound on a single key reconciliation.
    pub op_timeout: Duration,
}

impl SyncPolicy {
    pub fn from_settings(s: &configs::SyncSettings) -> Self {
        Self {
            background_interval: Duration::from_secs(s.background_interval_secs),
            focused_interval: Duration::from_secs(s.focused_interval_secs),
            editing_interval: Duration::from_secs(s.editing_interval_secs),
            backoff: BackoffPolicy {
                base: Duration::from_millis(s.backoff_base_ms),
                max: Duration::from_millis(s.backoff_max_ms),
                max_retries: s.max_retries,
            },
            op_timeout: Duration::from_millis(s.op_timeout_ms),
        }
    }

    pub fn interval_for(&self, activity: SyncActivity) -> Duration {
        match activity {
            SyncActivity::Background => self.background_interval,
            SyncActivity::Focused => self.focused_interval,
            SyncActivity::Editing => self.editing_interval,
        }
    }
}

impl Default for SyncPolicy {
    fn default() -> Self { Self::from_settings(&configs::SyncSettings::default()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOutcome {
    /// Nothing selected, nothing cached.
    Skipped,
    Unchanged,
    /// Remote copy written to the cache.
    Pulled,
    /// Local edit written to the store.
    Pushed,
    /// Local edit refused by the store; remote copy restored.
    Rejected,
    /// Local edit was staged against a copy the store has since replaced;
    /// remote copy kept.
    Conflicted,
    /// Entry purged.
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub business: KeyOutcome,
    pub property: KeyOutcome,
}

impl CycleReport {
    /// True when the cycle changed nothing locally or remotely.
    pub fn is_noop(&self) -> bool {
        [self.business, self.property].iter().all(|o| matches!(o, KeyOutcome::Skipped | KeyOutcome::Unchanged))
    }
}

fn record_field(rec: &CachedRecord, field: &str) -> Option<String> {
    rec.value.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

pub struct SyncReconciler<R: TenantRepository + ?Sized> {
    hierarchy: HierarchyService<R>,
    cache: Arc<dyn LocalCache>,
    session: Mutex<SessionContext>,
    policy: SyncPolicy,
    activity: Mutex<SyncActivity>,
    pending_trigger: Mutex<Option<SyncTrigger>>,
    wake: Notify,
    retune: Notify,
    cycle_lock: Arc<AsyncMutex<()>>,
    cache_lock: AsyncMutex<()>,
    status: ArcSwap<SyncStatus>,
    cycles: AtomicU64,
    // 最近一次同步结果，供排队等待的调用方共享
    last_result: Mutex<Option<Result<CycleReport, ServiceError>>>,
}

impl<R: TenantRepository + ?Sized + 'static> SyncReconciler<R> {
    pub fn new(hierarchy: HierarchyService<R>, cache: Arc<dyn LocalCache>, session: SessionContext, policy: SyncPolicy) -> Self {
        Self {
            hierarchy,
            cache,
            session: Mutex::new(session),
            policy,
            activity: Mutex::new(SyncActivity::Background),
            pending_trigger: Mutex::new(None),
            wake: Notify::new(),
            retune: Notify::new(),
            cycle_lock: Arc::new(AsyncMutex::new(())),
            cache_lock: AsyncMutex::new(()),
            status: ArcSwap::from_pointee(SyncStatus::default()),
            cycles: AtomicU64::new(0),
            last_result: Mutex::new(None),
        }
    }

    pub fn status(&self) -> Arc<SyncStatus> { self.status.load_full() }

    pub fn session(&self) -> SessionContext { self.lock_session().clone() }

    /// Adopt a freshly resolved actor without waiting for the next cycle.
    pub fn refresh_actor(&self, actor: Actor) { self.lock_session().refresh_actor(actor) }

    pub fn policy(&self) -> &SyncPolicy { &self.policy }

    pub fn activity(&self) -> SyncActivity {
        *self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the periodic interval; the run loop picks it up immediately.
    pub fn set_activity(&self, activity: SyncActivity) {
        *self.activity.lock().unwrap_or_else(PoisonError::into_inner) = activity;
        self.retune.notify_one();
    }

    /// Ask for a cycle. Requests made while a cycle runs collapse into one
    /// follow-up.
    pub fn request(&self, trigger: SyncTrigger) {
        *self.pending_trigger.lock().unwrap_or_else(PoisonError::into_inner) = Some(trigger);
        self.wake.notify_one();
    }

    fn take_trigger(&self) -> SyncTrigger {
        self.pending_trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(SyncTrigger::LocalMutation)
    }

    fn lock_session(&self) -> MutexGuard<'_, SessionContext> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, f: impl FnOnce(&mut SyncStatus)) {
        let mut next = SyncStatus::clone(&self.status.load_full());
        f(&mut next);
        self.status.store(Arc::new(next));
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.policy.op_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(ServiceError::RemoteUnavailable("sync step timed out".into())),
        }
    }

    /// Drive cycles from triggers and the activity timer until `shutdown`
    /// resolves, then attempt an emergency flush.
    pub async fn run<S>(self: Arc<Self>, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.restore_session().await;
        self.request(SyncTrigger::Startup);
        loop {
            let interval = self.policy.interval_for(self.activity());
            let trigger = tokio::select! {
                _ = &mut shutdown => break,
                _ = self.wake.notified() => self.take_trigger(),
                _ = self.retune.notified() => continue,
                _ = tokio::time::sleep(interval) => SyncTrigger::Timer,
            };
            if trigger == SyncTrigger::Teardown {
                break;
            }
            // failures are published through status()
            let _ = self.sync_now(trigger).await;
        }
        debug!("sync loop stopped");
        self.emergency_flush();
    }

    /// Run one cycle now, retrying retryable failures with backoff. After the
    /// last retry the status is flagged `out_of_sync`.
    ///
    /// Callers that arrive while a cycle is running share one follow-up
    /// cycle: whoever gets the lock first runs it and the rest receive its
    /// result.
    pub async fn sync_now(&self, trigger: SyncTrigger) -> Result<CycleReport, ServiceError> {
        // any cycle numbered above this one started after we arrived
        let arrived_at = self.cycles.load(Ordering::SeqCst);
        let _cycle = self.cycle_lock.lock().await;
        if self.cycles.load(Ordering::SeqCst) > arrived_at {
            let joined = self.last_result.lock().unwrap_or_else(PoisonError::into_inner).clone();
            if let Some(shared) = joined {
                debug!(?trigger, "joined a cycle that ran while waiting");
                return shared;
            }
        }
        let n = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.run_cycle(trigger, n).await;
        *self.last_result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        result
    }

    async fn run_cycle(&self, trigger: SyncTrigger, n: u64) -> Result<CycleReport, ServiceError> {
        let backoff = &self.policy.backoff;
        let mut attempt = 0;
        loop {
            self.publish(|s| {
                s.state = SyncState::Syncing;
                s.last_trigger = Some(trigger);
                s.cycles = n;
            });
            debug!(?trigger, cycle = n, attempt, "sync cycle started");
            match self.cycle().await {
                Ok(report) => {
                    self.publish(|s| {
                        s.state = SyncState::Succeeded;
                        s.last_success_at = Some(Utc::now());
                        s.consecutive_failures = 0;
                        s.out_of_sync = false;
                        s.last_error = None;
                    });
                    debug!(cycle = n, business = ?report.business, property = ?report.property, "sync cycle succeeded");
                    return Ok(report);
                }
                Err(e) if e.is_retryable() && attempt < backoff.max_retries => {
                    attempt += 1;
                    let delay = backoff.delay(attempt);
                    self.publish(|s| {
                        s.state = SyncState::Failed { retryable: true };
                        s.consecutive_failures += 1;
                        s.last_error = Some(e.code());
                    });
                    debug!(cycle = n, attempt, delay_ms = delay.as_millis() as u64, error = %e, "sync attempt failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    self.publish(|s| {
                        s.state = SyncState::Failed { retryable };
                        s.consecutive_failures += 1;
                        s.last_error = Some(e.code());
                        if retryable {
                            s.out_of_sync = true;
                        }
                    });
                    if retryable {
                        warn!(cycle = n, attempts = attempt + 1, error = %e, "sync retries exhausted, local state out of sync");
                    } else {
                        warn!(cycle = n, code = e.code(), error = %e, "sync cycle failed");
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn cycle(&self) -> Result<CycleReport, ServiceError> {
        let user_id = self.lock_session().user_id();
        let actor = match self.bounded(self.hierarchy.actor_by_id(user_id)).await {
            Ok(actor) => actor,
            Err(e @ ServiceError::Auth(_)) => {
                self.sign_out().await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let (business, property) = {
            let mut session = self.lock_session();
            session.refresh_actor(actor.clone());
            (session.current_business().map(str::to_string), session.current_property())
        };

        let business_outcome = match &business {
            Some(id) => self.bounded(self.reconcile_business(&actor, id)).await?,
            None => self.drop_key(LocalKey::CurrentBusiness).await?,
        };
        let property_outcome = match (&business, property) {
            _ if business_outcome == KeyOutcome::Cleared => KeyOutcome::Cleared,
            (Some(b), Some(p)) => self.bounded(self.reconcile_property(&actor, b, p)).await?,
            _ => self.drop_key(LocalKey::CurrentProperty).await?,
        };
        Ok(CycleReport { business: business_outcome, property: property_outcome })
    }

    async fn drop_key(&self, key: LocalKey) -> Result<KeyOutcome, ServiceError> {
        let _guard = self.cache_lock.lock().await;
        if self.cache.clear(key).await? { Ok(KeyOutcome::Cleared) } else { Ok(KeyOutcome::Skipped) }
    }

    async fn reconcile_business(&self, actor: &Actor, id: &str) -> Result<KeyOutcome, ServiceError> {
        let _guard = self.cache_lock.lock().await;
        if self.lock_session().current_business() != Some(id) {
            return Ok(KeyOutcome::Skipped);
        }
        let cached = match self.cache.read(LocalKey::CurrentBusiness).await {
            Some(rec) if record_field(&rec, "id").as_deref() == Some(id) => Some(rec),
            Some(_) => {
                self.cache.clear(LocalKey::CurrentBusiness).await?;
                None
            }
            None => None,
        };

        let remote = match self.hierarchy.get_business(actor, id).await {
            Ok(b) => b,
            Err(e @ (ServiceError::NotFound(_) | ServiceError::Denied(_))) => {
                self.cache.clear(LocalKey::CurrentBusiness).await?;
                self.cache.clear(LocalKey::CurrentProperty).await?;
                self.lock_session().clear();
                info!(business_id = %id, reason = e.code(), "cached business purged");
                return Ok(KeyOutcome::Cleared);
            }
            Err(e) => return Err(e),
        };

        match cached {
            Some(rec) if rec.pending && rec.remote_updated_at == Some(remote.updated_at) => {
                let local: Business = rec.decode()?;
                match self.hierarchy.update_business(actor, id, BusinessPatch::from_snapshot(&local)).await {
                    Ok(updated) => {
                        self.cache.write(LocalKey::CurrentBusiness, CachedRecord::confirmed(&updated, updated.updated_at)?).await?;
                        info!(business_id = %id, "local business edit pushed");
                        Ok(KeyOutcome::Pushed)
                    }
                    Err(e @ (ServiceError::Denied(_) | ServiceError::Validation(_) | ServiceError::Conflict(_))) => {
                        self.cache.write(LocalKey::CurrentBusiness, CachedRecord::confirmed(&remote, remote.updated_at)?).await?;
                        warn!(business_id = %id, code = e.code(), "local business edit rejected");
                        Ok(KeyOutcome::Rejected)
                    }
                    Err(e) => Err(e),
                }
            }
            Some(rec) if rec.pending => {
                self.cache.write(LocalKey::CurrentBusiness, CachedRecord::confirmed(&remote, remote.updated_at)?).await?;
                warn!(
                    business_id = %id,
                    staged_against = ?rec.remote_updated_at,
                    remote_updated_at = %remote.updated_at,
                    "local business edit conflicts with a newer remote copy, remote kept"
                );
                Ok(KeyOutcome::Conflicted)
            }
            Some(rec) if rec.remote_updated_at == Some(remote.updated_at) => Ok(KeyOutcome::Unchanged),
            _ => {
                self.cache.write(LocalKey::CurrentBusiness, CachedRecord::confirmed(&remote, remote.updated_at)?).await?;
                Ok(KeyOutcome::Pulled)
            }
        }
    }

    async fn reconcile_property(&self, actor: &Actor, business_id: &str, id: Uuid) -> Result<KeyOutcome, ServiceError> {
        let _guard = self.cache_lock.lock().await;
        if self.lock_session().current_property() != Some(id) {
            return Ok(KeyOutcome::Skipped);
        }
        let id_str = id.to_string();
        let cached = match self.cache.read(LocalKey::CurrentProperty).await {
            Some(rec) if record_field(&rec, "id").as_deref() == Some(id_str.as_str()) => Some(rec),
            Some(_) => {
                self.cache.clear(LocalKey::CurrentProperty).await?;
                None
            }
            None => None,
        };

        let remote = match self.hierarchy.get_property(actor, id).await {
            Ok(p) if p.business_id == business_id => p,
            Ok(_) | Err(ServiceError::NotFound(_) | ServiceError::Denied(_)) => {
                self.cache.clear(LocalKey::CurrentProperty).await?;
                self.lock_session().select_property(business_id, None);
                info!(property_id = %id, "cached property purged");
                return Ok(KeyOutcome::Cleared);
            }
            Err(e) => return Err(e),
        };

        match cached {
            Some(rec) if rec.pending && rec.remote_updated_at == Some(remote.updated_at) => {
                let local: Property = rec.decode()?;
                match self.hierarchy.update_property(actor, id, PropertyPatch::from_snapshot(&local)).await {
                    Ok(updated) => {
                        self.cache.write(LocalKey::CurrentProperty, CachedRecord::confirmed(&updated, updated.updated_at)?).await?;
                        info!(property_id = %id, "local property edit pushed");
                        Ok(KeyOutcome::Pushed)
                    }
                    Err(e @ (ServiceError::Denied(_) | ServiceError::Validation(_) | ServiceError::Conflict(_))) => {
                        self.cache.write(LocalKey::CurrentProperty, CachedRecord::confirmed(&remote, remote.updated_at)?).await?;
                        warn!(property_id = %id, code = e.code(), "local property edit rejected");
                        Ok(KeyOutcome::Rejected)
                    }
                    Err(e) => Err(e),
                }
            }
            Some(rec) if rec.pending => {
                self.cache.write(LocalKey::CurrentProperty, CachedRecord::confirmed(&remote, remote.updated_at)?).await?;
                warn!(
                    property_id = %id,
                    staged_against = ?rec.remote_updated_at,
                    remote_updated_at = %remote.updated_at,
                    "local property edit conflicts with a newer remote copy, remote kept"
                );
                Ok(KeyOutcome::Conflicted)
            }
            Some(rec) if rec.remote_updated_at == Some(remote.updated_at) => Ok(KeyOutcome::Unchanged),
            _ => {
                self.cache.write(LocalKey::CurrentProperty, CachedRecord::confirmed(&remote, remote.updated_at)?).await?;
                Ok(KeyOutcome::Pulled)
            }
        }
    }

    /// Push whatever pending edits the cache holds for the current selection.
    async fn push_pending(&self) -> Result<usize, ServiceError> {
        let (actor, business, property) = {
            let s = self.lock_session();
            (s.actor().clone(), s.current_business().map(str::to_string), s.current_property())
        };
        let mut pushed = 0;
        if let Some(b) = &business {
            if self.cache.read(LocalKey::CurrentBusiness).await.map(|r| r.pending).unwrap_or(false)
                && self.reconcile_business(&actor, b).await? == KeyOutcome::Pushed
            {
                pushed += 1;
            }
            if let Some(p) = property {
                if self.cache.read(LocalKey::CurrentProperty).await.map(|r| r.pending).unwrap_or(false)
                    && self.reconcile_property(&actor, b, p).await? == KeyOutcome::Pushed
                {
                    pushed += 1;
                }
            }
        }
        Ok(pushed)
    }

    /// Restore the selection persisted by an earlier session.
    pub async fn restore_session(&self) {
        if self.lock_session().current_business().is_none() {
            if let Some(id) = self.cache.read(LocalKey::CurrentBusiness).await.and_then(|r| record_field(&r, "id")) {
                self.lock_session().select_business(Some(id));
            }
        }
        if self.lock_session().current_property().is_none() {
            if let Some(rec) = self.cache.read(LocalKey::CurrentProperty).await {
                let id = record_field(&rec, "id").and_then(|s| Uuid::parse_str(&s).ok());
                let business = record_field(&rec, "business_id");
                let mut session = self.lock_session();
                if let (Some(id), Some(b)) = (id, business) {
                    if session.current_business() == Some(b.as_str()) {
                        session.select_property(&b, Some(id));
                    }
                }
            }
        }
    }

    /// Make `business_id` the session's working business. Pending edits of
    /// the previous selection are pushed first so they are not lost.
    pub async fn switch_business(&self, business_id: &str) -> Result<Business, ServiceError> {
        self.bounded(self.push_pending()).await?;
        let actor = self.lock_session().actor().clone();
        let business = self.hierarchy.get_business(&actor, business_id).await?;

        let _guard = self.cache_lock.lock().await;
        self.cache.write(LocalKey::CurrentBusiness, CachedRecord::confirmed(&business, business.updated_at)?).await?;
        let changed = {
            let mut s = self.lock_session();
            let changed = s.current_business() != Some(business_id);
            s.select_business(Some(business_id.to_string()));
            changed
        };
        if changed {
            self.cache.clear(LocalKey::CurrentProperty).await?;
        }
        info!(business_id = %business_id, "business selected");
        Ok(business)
    }

    /// Make `property_id` (and its business) the working selection.
    pub async fn switch_property(&self, property_id: Uuid) -> Result<Property, ServiceError> {
        self.bounded(self.push_pending()).await?;
        let actor = self.lock_session().actor().clone();
        let property = self.hierarchy.get_property(&actor, property_id).await?;
        let business = self.hierarchy.get_business(&actor, &property.business_id).await?;

        let _guard = self.cache_lock.lock().await;
        self.cache.write(LocalKey::CurrentBusiness, CachedRecord::confirmed(&business, business.updated_at)?).await?;
        self.cache.write(LocalKey::CurrentProperty, CachedRecord::confirmed(&property, property.updated_at)?).await?;
        self.lock_session().select_property(&property.business_id, Some(property_id));
        info!(property_id = %property_id, business_id = %property.business_id, "property selected");
        Ok(property)
    }

    /// Queue an offline edit of the current business and request a cycle.
    pub async fn stage_business_edit(&self, patch: BusinessPatch) -> Result<Business, ServiceError> {
        if let Some(name) = &patch.name {
            models::business::validate_name(name)?;
        }
        let staged = {
            let _guard = self.cache_lock.lock().await;
            let id = self.lock_session().current_business().map(str::to_string);
            let id = id.ok_or_else(|| ServiceError::Validation("no business selected".into()))?;
            let rec = self
                .cache
                .read(LocalKey::CurrentBusiness)
                .await
                .filter(|r| record_field(r, "id").as_deref() == Some(id.as_str()))
                .ok_or_else(|| ServiceError::not_found("cached business"))?;
            let mut local: Business = rec.decode()?;
            patch.apply_to(&mut local);
            self.cache.write(LocalKey::CurrentBusiness, CachedRecord::staged(&local, rec.remote_updated_at)?).await?;
            local
        };
        self.request(SyncTrigger::LocalMutation);
        Ok(staged)
    }

    /// Queue an offline edit of the current property and request a cycle.
    pub async fn stage_property_edit(&self, patch: PropertyPatch) -> Result<Property, ServiceError> {
        if let Some(name) = &patch.name {
            models::property::validate_name(name)?;
        }
        let staged = {
            let _guard = self.cache_lock.lock().await;
            let id = self.lock_session().current_property();
            let id = id.ok_or_else(|| ServiceError::Validation("no property selected".into()))?;
            let id_str = id.to_string();
            let rec = self
                .cache
                .read(LocalKey::CurrentProperty)
                .await
                .filter(|r| record_field(r, "id").as_deref() == Some(id_str.as_str()))
                .ok_or_else(|| ServiceError::not_found("cached property"))?;
            let mut local: Property = rec.decode()?;
            patch.apply_to(&mut local);
            self.cache.write(LocalKey::CurrentProperty, CachedRecord::staged(&local, rec.remote_updated_at)?).await?;
            local
        };
        self.request(SyncTrigger::LocalMutation);
        Ok(staged)
    }

    /// Drop every cached entry and the selection, e.g. on logout or when the
    /// session's user was revoked.
    pub async fn sign_out(&self) -> Result<(), ServiceError> {
        let _guard = self.cache_lock.lock().await;
        self.cache.clear_all().await?;
        self.lock_session().clear();
        info!(user_id = %self.lock_session().user_id(), "local cache purged");
        Ok(())
    }

    /// Best-effort push on teardown. Never blocks: returns `false` without
    /// doing anything if a cycle is running or no runtime is available.
    pub fn emergency_flush(self: &Arc<Self>) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let Ok(guard) = self.cycle_lock.clone().try_lock_owned() else {
            debug!("cycle in progress, skipping emergency flush");
            return false;
        };
        let this = Arc::clone(self);
        handle.spawn(async move { this.flush_locked(guard).await });
        true
    }

    /// Same as [`emergency_flush`](Self::emergency_flush) but waits for the
    /// push, bounded by the operation timeout.
    pub async fn flush_pending(&self) -> bool {
        let Ok(guard) = self.cycle_lock.clone().try_lock_owned() else {
            debug!("cycle in progress, skipping flush");
            return false;
        };
        self.flush_locked(guard).await;
        true
    }

    async fn flush_locked(&self, _cycle: OwnedMutexGuard<()>) {
        match self.bounded(self.push_pending()).await {
            Ok(pushed) => debug!(pushed, "emergency flush done"),
            Err(e) => warn!(error = %e, "emergency flush failed, local edits may be lost"),
        }
    }
}
