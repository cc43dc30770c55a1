use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::codes::CodeScope;
use crate::domain::{Business, BusinessPatch, Property, PropertyPatch, Role, User, UserPatch};

/// Failures reported by a tenant store implementation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Backend(String),
}

/// Result of an atomic property deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRemoval {
    pub property: Property,
    /// Users whose access set contained the property.
    pub affected_users: Vec<Uuid>,
}

/// Durable remote store for the tenant hierarchy.
///
/// Implementations maintain `updated_at` themselves and must apply every
/// multi-record mutation atomically: a concurrent reader sees either the
/// state before or after it, never a mix.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Create-if-absent. `Ok(false)` means the code is already taken.
    async fn reserve_code(&self, scope: CodeScope, code: &str) -> Result<bool, StoreError>;
    /// Mark a reserved code as retired. Retired codes stay reserved.
    async fn retire_code(&self, scope: CodeScope, code: &str) -> Result<(), StoreError>;

    /// Insert a business; when `owner_link` is set, that user is attached to
    /// the new business in the same transaction.
    async fn insert_business(&self, business: Business, owner_link: Option<Uuid>) -> Result<Business, StoreError>;
    async fn get_business(&self, id: &str) -> Result<Option<Business>, StoreError>;
    async fn list_businesses(&self) -> Result<Vec<Business>, StoreError>;
    async fn update_business(&self, id: &str, patch: &BusinessPatch) -> Result<Business, StoreError>;
    /// Fails with `Conflict` while the business still owns properties.
    async fn delete_business(&self, id: &str) -> Result<(), StoreError>;

    /// Insert a property. The store decides `is_main`: true iff the business
    /// has no other property at commit time.
    async fn create_property(&self, property: Property) -> Result<Property, StoreError>;
    async fn get_property(&self, id: Uuid) -> Result<Option<Property>, StoreError>;
    async fn find_property_by_code(&self, code: &str) -> Result<Option<Property>, StoreError>;
    async fn list_properties(&self, business_id: &str) -> Result<Vec<Property>, StoreError>;
    async fn update_property(&self, id: Uuid, patch: &PropertyPatch) -> Result<Property, StoreError>;
    /// Promote `id` and demote the previous main property atomically.
    async fn set_main_property(&self, id: Uuid) -> Result<Property, StoreError>;
    /// Remove the property from its business, strip it from every access set,
    /// delete it and retire its code, all or nothing. Refuses the main property.
    async fn delete_property(&self, id: Uuid) -> Result<PropertyRemoval, StoreError>;

    /// Insert a user with its password hash. Every granted property must
    /// belong to the user's business at commit time.
    async fn insert_user(&self, user: User, password_hash: String) -> Result<User, StoreError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn get_password_hash(&self, user_id: Uuid) -> Result<Option<String>, StoreError>;
    async fn list_users_by_business(&self, business_id: &str) -> Result<Vec<User>, StoreError>;
    async fn list_users_with_property(&self, property_id: Uuid) -> Result<Vec<User>, StoreError>;
    async fn count_users_with_role(&self, role: Role) -> Result<u64, StoreError>;
    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<User, StoreError>;
    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<User, StoreError>;
    /// Moving a user to another business clears its access set.
    async fn assign_user_business(&self, id: Uuid, business_id: Option<String>) -> Result<User, StoreError>;
    /// Fails with `Conflict` if the property is not owned by the user's business.
    async fn grant_property_access(&self, user_id: Uuid, property_id: Uuid) -> Result<User, StoreError>;
    async fn revoke_property_access(&self, user_id: Uuid, property_id: Uuid) -> Result<User, StoreError>;
    /// Increment the revocation marker and return the new value.
    async fn bump_session_version(&self, id: Uuid) -> Result<u32, StoreError>;
    async fn touch_last_authenticated(&self, id: Uuid) -> Result<(), StoreError>;
    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;
}

/// In-process store used by tests, demos and offline tooling.
pub mod memory {
    use super::*;
    use std::collections::{BTreeSet, HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use crate::domain::normalize_email;

    #[derive(Default)]
    struct State {
        businesses: HashMap<String, Business>,
        properties: HashMap<Uuid, Property>,
        users: HashMap<Uuid, User>,
        passwords: HashMap<Uuid, String>,
        codes: HashMap<(CodeScope, String), bool>, // value: retired
        clock: Option<DateTime<Utc>>,
    }

    impl State {
        /// Store clock; strictly increasing so `updated_at` orders writes.
        fn tick(&mut self) -> DateTime<Utc> {
            let now = Utc::now();
            let next = match self.clock {
                Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
                _ => now,
            };
            self.clock = Some(next);
            next
        }

        fn business_mut(&mut self, id: &str) -> Result<&mut Business, StoreError> {
            self.businesses.get_mut(id).ok_or_else(|| StoreError::NotFound(format!("business {id}")))
        }

        fn user_mut(&mut self, id: Uuid) -> Result<&mut User, StoreError> {
            self.users.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("user {id}")))
        }

        fn property_in_business(&self, property_id: Uuid, business_id: Option<&str>) -> bool {
            match (self.properties.get(&property_id), business_id) {
                (Some(p), Some(b)) => p.business_id == b,
                _ => false,
            }
        }
    }

    #[derive(Default)]
    pub struct MemoryTenantRepository {
        state: RwLock<State>,
        offline: AtomicBool,
        latency_ms: AtomicU64,
        user_reads: AtomicU64,
        injected: Mutex<Option<StoreError>>,
    }

    impl MemoryTenantRepository {
        pub fn new() -> Self { Self::default() }

        /// Simulate losing (or regaining) the connection to the store.
        pub fn set_offline(&self, offline: bool) { self.offline.store(offline, Ordering::SeqCst); }

        /// Delay every call, to exercise timeouts and in-flight overlap.
        pub fn set_latency(&self, latency: Duration) {
            self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
        }

        /// Fail the next call with `err`.
        pub fn fail_next(&self, err: StoreError) {
            *self.injected.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        }

        /// Number of `get_user` calls served so far.
        pub fn user_reads(&self) -> u64 { self.user_reads.load(Ordering::SeqCst) }

        async fn gate(&self) -> Result<(), StoreError> {
            let latency = self.latency_ms.load(Ordering::SeqCst);
            if latency > 0 {
                tokio::time::sleep(Duration::from_millis(latency)).await;
            }
            if let Some(err) = self.injected.lock().unwrap_or_else(PoisonError::into_inner).take() {
                return Err(err);
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("store offline".into()));
            }
            Ok(())
        }

        fn read(&self) -> RwLockReadGuard<'_, State> {
            self.state.read().unwrap_or_else(PoisonError::into_inner)
        }

        fn write(&self) -> RwLockWriteGuard<'_, State> {
            self.state.write().unwrap_or_else(PoisonError::into_inner)
        }
    }

    #[async_trait]
    impl TenantRepository for MemoryTenantRepository {
        async fn reserve_code(&self, scope: CodeScope, code: &str) -> Result<bool, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let key = (scope, code.to_string());
            if st.codes.contains_key(&key) {
                return Ok(false);
            }
            st.codes.insert(key, false);
            Ok(true)
        }

        async fn retire_code(&self, scope: CodeScope, code: &str) -> Result<(), StoreError> {
            self.gate().await?;
            let mut st = self.write();
            st.codes.insert((scope, code.to_string()), true);
            Ok(())
        }

        async fn insert_business(&self, mut business: Business, owner_link: Option<Uuid>) -> Result<Business, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            if st.businesses.contains_key(&business.id) {
                return Err(StoreError::Conflict(format!("business {} already exists", business.id)));
            }
            if let Some(owner) = owner_link {
                let user = st.users.get(&owner).ok_or_else(|| StoreError::NotFound(format!("user {owner}")))?;
                if user.business_id.is_some() {
                    return Err(StoreError::Conflict(format!("user {owner} already belongs to a business")));
                }
            }
            let now = st.tick();
            business.property_ids.clear();
            business.created_at = now;
            business.updated_at = now;
            if let Some(owner) = owner_link {
                let user = st.user_mut(owner)?;
                user.business_id = Some(business.id.clone());
                user.property_access.clear();
                user.updated_at = now;
            }
            st.businesses.insert(business.id.clone(), business.clone());
            Ok(business)
        }

        async fn get_business(&self, id: &str) -> Result<Option<Business>, StoreError> {
            self.gate().await?;
            Ok(self.read().businesses.get(id).cloned())
        }

        async fn list_businesses(&self) -> Result<Vec<Business>, StoreError> {
            self.gate().await?;
            let mut all: Vec<Business> = self.read().businesses.values().cloned().collect();
            all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(all)
        }

        async fn update_business(&self, id: &str, patch: &BusinessPatch) -> Result<Business, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let now = st.tick();
            let business = st.business_mut(id)?;
            patch.apply_to(business);
            business.updated_at = now;
            Ok(business.clone())
        }

        async fn delete_business(&self, id: &str) -> Result<(), StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let business = st.businesses.get(id).ok_or_else(|| StoreError::NotFound(format!("business {id}")))?;
            if !business.property_ids.is_empty() {
                return Err(StoreError::Conflict(format!("business {id} still owns properties")));
            }
            let now = st.tick();
            st.businesses.remove(id);
            for user in st.users.values_mut().filter(|u| u.business_id.as_deref() == Some(id)) {
                user.business_id = None;
                user.updated_at = now;
            }
            Ok(())
        }

        async fn create_property(&self, mut property: Property) -> Result<Property, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            if !st.businesses.contains_key(&property.business_id) {
                return Err(StoreError::NotFound(format!("business {}", property.business_id)));
            }
            if st.properties.values().any(|p| p.connection_code == property.connection_code) {
                return Err(StoreError::Conflict(format!("connection code {} in use", property.connection_code)));
            }
            let now = st.tick();
            let business = st.business_mut(&property.business_id)?;
            property.is_main = business.property_ids.is_empty();
            property.created_at = now;
            property.updated_at = now;
            business.property_ids.push(property.id);
            business.updated_at = now;
            st.properties.insert(property.id, property.clone());
            Ok(property)
        }

        async fn get_property(&self, id: Uuid) -> Result<Option<Property>, StoreError> {
            self.gate().await?;
            Ok(self.read().properties.get(&id).cloned())
        }

        async fn find_property_by_code(&self, code: &str) -> Result<Option<Property>, StoreError> {
            self.gate().await?;
            Ok(self.read().properties.values().find(|p| p.connection_code == code).cloned())
        }

        async fn list_properties(&self, business_id: &str) -> Result<Vec<Property>, StoreError> {
            self.gate().await?;
            let st = self.read();
            let business = st.businesses.get(business_id).ok_or_else(|| StoreError::NotFound(format!("business {business_id}")))?;
            Ok(business.property_ids.iter().filter_map(|id| st.properties.get(id).cloned()).collect())
        }

        async fn update_property(&self, id: Uuid, patch: &PropertyPatch) -> Result<Property, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let now = st.tick();
            let property = st.properties.get_mut(&id).ok_or_else(|| StoreError::NotFound(format!("property {id}")))?;
            patch.apply_to(property);
            property.updated_at = now;
            Ok(property.clone())
        }

        async fn set_main_property(&self, id: Uuid) -> Result<Property, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let business_id = st.properties.get(&id).map(|p| p.business_id.clone())
                .ok_or_else(|| StoreError::NotFound(format!("property {id}")))?;
            let now = st.tick();
            for p in st.properties.values_mut().filter(|p| p.business_id == business_id) {
                let should_be_main = p.id == id;
                if p.is_main != should_be_main {
                    p.is_main = should_be_main;
                    p.updated_at = now;
                }
            }
            st.properties.get(&id).cloned().ok_or_else(|| StoreError::NotFound(format!("property {id}")))
        }

        async fn delete_property(&self, id: Uuid) -> Result<PropertyRemoval, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let property = st.properties.get(&id).cloned().ok_or_else(|| StoreError::NotFound(format!("property {id}")))?;
            if property.is_main {
                return Err(StoreError::Conflict("cannot delete the main property; promote another first".into()));
            }
            let now = st.tick();
            if let Some(business) = st.businesses.get_mut(&property.business_id) {
                business.property_ids.retain(|p| *p != id);
                business.updated_at = now;
            }
            let mut affected_users = Vec::new();
            for user in st.users.values_mut() {
                if user.property_access.remove(&id) {
                    user.updated_at = now;
                    affected_users.push(user.id);
                }
            }
            affected_users.sort();
            st.properties.remove(&id);
            st.codes.insert((CodeScope::Connection, property.connection_code.clone()), true);
            Ok(PropertyRemoval { property, affected_users })
        }

        async fn insert_user(&self, mut user: User, password_hash: String) -> Result<User, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            user.email = normalize_email(&user.email);
            if st.users.values().any(|u| u.email == user.email) {
                return Err(StoreError::Conflict(format!("user {} already exists", user.email)));
            }
            if let Some(b) = &user.business_id {
                if !st.businesses.contains_key(b) {
                    return Err(StoreError::NotFound(format!("business {b}")));
                }
            }
            if let Some(bad) = user.property_access.iter().find(|p| !st.property_in_business(**p, user.business_id.as_deref())) {
                return Err(StoreError::Conflict(format!("property {bad} is not owned by the user's business")));
            }
            let now = st.tick();
            user.created_at = now;
            user.updated_at = now;
            st.passwords.insert(user.id, password_hash);
            st.users.insert(user.id, user.clone());
            Ok(user)
        }

        async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            self.user_reads.fetch_add(1, Ordering::SeqCst);
            self.gate().await?;
            Ok(self.read().users.get(&id).cloned())
        }

        async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.gate().await?;
            let email = normalize_email(email);
            Ok(self.read().users.values().find(|u| u.email == email).cloned())
        }

        async fn get_password_hash(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
            self.gate().await?;
            Ok(self.read().passwords.get(&user_id).cloned())
        }

        async fn list_users_by_business(&self, business_id: &str) -> Result<Vec<User>, StoreError> {
            self.gate().await?;
            let mut users: Vec<User> = self.read().users.values()
                .filter(|u| u.business_id.as_deref() == Some(business_id))
                .cloned()
                .collect();
            users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(users)
        }

        async fn list_users_with_property(&self, property_id: Uuid) -> Result<Vec<User>, StoreError> {
            self.gate().await?;
            let mut users: Vec<User> = self.read().users.values()
                .filter(|u| u.property_access.contains(&property_id))
                .cloned()
                .collect();
            users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(users)
        }

        async fn count_users_with_role(&self, role: Role) -> Result<u64, StoreError> {
            self.gate().await?;
            Ok(self.read().users.values().filter(|u| u.role == role).count() as u64)
        }

        async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<User, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let now = st.tick();
            let user = st.user_mut(id)?;
            if let Some(name) = &patch.name { user.name = name.clone(); }
            if let Some(active) = patch.is_active { user.is_active = active; }
            user.updated_at = now;
            Ok(user.clone())
        }

        async fn set_user_role(&self, id: Uuid, role: Role) -> Result<User, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let now = st.tick();
            let user = st.user_mut(id)?;
            user.role = role;
            user.updated_at = now;
            Ok(user.clone())
        }

        async fn assign_user_business(&self, id: Uuid, business_id: Option<String>) -> Result<User, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            if let Some(b) = &business_id {
                if !st.businesses.contains_key(b) {
                    return Err(StoreError::NotFound(format!("business {b}")));
                }
            }
            let now = st.tick();
            let user = st.user_mut(id)?;
            if user.business_id != business_id {
                user.property_access.clear();
            }
            user.business_id = business_id;
            user.updated_at = now;
            Ok(user.clone())
        }

        async fn grant_property_access(&self, user_id: Uuid, property_id: Uuid) -> Result<User, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let business = st.users.get(&user_id)
                .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?
                .business_id.clone();
            if !st.properties.contains_key(&property_id) {
                return Err(StoreError::NotFound(format!("property {property_id}")));
            }
            if !st.property_in_business(property_id, business.as_deref()) {
                return Err(StoreError::Conflict(format!("property {property_id} is not owned by the user's business")));
            }
            let now = st.tick();
            let user = st.user_mut(user_id)?;
            if user.property_access.insert(property_id) {
                user.updated_at = now;
            }
            Ok(user.clone())
        }

        async fn revoke_property_access(&self, user_id: Uuid, property_id: Uuid) -> Result<User, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let now = st.tick();
            let user = st.user_mut(user_id)?;
            if user.property_access.remove(&property_id) {
                user.updated_at = now;
            }
            Ok(user.clone())
        }

        async fn bump_session_version(&self, id: Uuid) -> Result<u32, StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let now = st.tick();
            let user = st.user_mut(id)?;
            user.session_version += 1;
            user.updated_at = now;
            Ok(user.session_version)
        }

        async fn touch_last_authenticated(&self, id: Uuid) -> Result<(), StoreError> {
            self.gate().await?;
            let mut st = self.write();
            let now = st.tick();
            st.user_mut(id)?.last_authenticated_at = Some(now);
            Ok(())
        }

        async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
            self.gate().await?;
            let mut st = self.write();
            if st.users.remove(&id).is_none() {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            st.passwords.remove(&id);
            Ok(())
        }
    }

    /// Invariant checks shared by tests.
    impl MemoryTenantRepository {
        /// Businesses that currently have more than one main property.
        pub fn businesses_with_multiple_mains(&self) -> Vec<String> {
            let st = self.read();
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for p in st.properties.values().filter(|p| p.is_main) {
                *counts.entry(p.business_id.as_str()).or_default() += 1;
            }
            counts.into_iter().filter(|(_, n)| *n > 1).map(|(b, _)| b.to_string()).collect()
        }

        /// Users holding grants outside their own business.
        pub fn users_with_foreign_grants(&self) -> Vec<Uuid> {
            let st = self.read();
            st.users.values()
                .filter(|u| u.property_access.iter().any(|p| !st.property_in_business(*p, u.business_id.as_deref())))
                .map(|u| u.id)
                .collect()
        }

        pub fn reserved_codes(&self, scope: CodeScope) -> HashSet<String> {
            self.read().codes.keys().filter(|(s, _)| *s == scope).map(|(_, c)| c.clone()).collect()
        }

        pub fn is_code_retired(&self, scope: CodeScope, code: &str) -> bool {
            self.read().codes.get(&(scope, code.to_string())).copied().unwrap_or(false)
        }

        /// Pre-reserve codes, e.g. to simulate a crowded code space.
        pub fn seed_codes<I: IntoIterator<Item = String>>(&self, scope: CodeScope, codes: I) {
            let mut st = self.write();
            for c in codes {
                st.codes.insert((scope, c), false);
            }
        }

        /// Snapshot of every user's grants, for atomicity checks.
        pub fn access_snapshot(&self) -> HashMap<Uuid, BTreeSet<Uuid>> {
            self.read().users.values().map(|u| (u.id, u.property_access.clone())).collect()
        }
    }
}
