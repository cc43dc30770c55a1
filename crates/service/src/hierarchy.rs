//! Tenant hierarchy operations: Business, Property and User lifecycle.
//!
//! Every operation resolves the target, runs it through [`authz::authorize`]
//! and only then mutates the store. Every store round-trip is bounded by
//! `op_timeout`; a timeout surfaces as `RemoteUnavailable`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::{AuthError, Claims, CredentialManager};
use crate::authz::{self, Action, Actor, Target, UserFacts};
use crate::codes::{CodeGenerator, CodeScope};
use crate::domain::{
    normalize_email, Business, BusinessPatch, JoinCode, JoinTarget, NewBusiness, NewProperty, NewUser, Property,
    PropertyPatch, Role, User, UserPatch, DEFAULT_BUSINESS_TYPE,
};
use crate::errors::ServiceError;
use crate::repository::{PropertyRemoval, StoreError, TenantRepository};

pub struct HierarchyService<R: TenantRepository + ?Sized> {
    repo: Arc<R>,
    codes: CodeGenerator<R>,
    credentials: CredentialManager<R>,
    op_timeout: Duration,
}

impl<R: TenantRepository + ?Sized> Clone for HierarchyService<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            codes: self.codes.clone(),
            credentials: self.credentials.clone(),
            op_timeout: self.op_timeout,
        }
    }
}

fn guard(actor: &Actor, action: Action, target: Target<'_>) -> Result<(), ServiceError> {
    let decision = authz::authorize(actor, &action, &target);
    if let authz::Decision::Deny(reason) = decision {
        warn!(user_id = %actor.user_id, role = %actor.role, action = ?action.kind(), reason = %reason, "authorization_denied");
    }
    decision.into_result()
}

fn password_error(e: AuthError) -> ServiceError {
    match e {
        AuthError::Validation(msg) => ServiceError::Validation(msg),
        other => ServiceError::Auth(other),
    }
}

impl<R: TenantRepository + ?Sized + 'static> HierarchyService<R> {
    pub fn new(repo: Arc<R>, credentials: CredentialManager<R>, code_attempts: u32, op_timeout: Duration) -> Self {
        Self { codes: CodeGenerator::new(repo.clone(), code_attempts), repo, credentials, op_timeout }
    }

    pub fn repository(&self) -> &Arc<R> { &self.repo }

    pub fn credentials(&self) -> &CredentialManager<R> { &self.credentials }

    async fn within<T, F>(&self, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(res) => res.map_err(ServiceError::from),
            Err(_) => Err(ServiceError::RemoteUnavailable(format!("store call timed out after {}ms", self.op_timeout.as_millis()))),
        }
    }

    async fn load_business(&self, id: &str) -> Result<Business, ServiceError> {
        self.within(self.repo.get_business(id)).await?.ok_or_else(|| ServiceError::not_found("business"))
    }

    async fn load_property(&self, id: Uuid) -> Result<Property, ServiceError> {
        self.within(self.repo.get_property(id)).await?.ok_or_else(|| ServiceError::not_found("property"))
    }

    async fn load_user(&self, id: Uuid) -> Result<User, ServiceError> {
        self.within(self.repo.get_user(id)).await?.ok_or_else(|| ServiceError::not_found("user"))
    }

    /// Resolve verified claims to an actor using the *current* user record,
    /// so demotions and revocations apply immediately.
    pub async fn actor_for(&self, claims: &Claims) -> Result<Actor, ServiceError> {
        self.actor_by_id(claims.sub).await
    }

    pub async fn actor_by_id(&self, user_id: Uuid) -> Result<Actor, ServiceError> {
        let user = self.within(self.repo.get_user(user_id)).await?.ok_or(AuthError::Revoked)?;
        if !user.is_active {
            return Err(AuthError::Inactive.into());
        }
        Ok(Actor::from_user(&user))
    }

    /// Create the first super-admin. Refused once one exists.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn bootstrap_super_admin(&self, email: &str, name: &str, password: &str) -> Result<User, ServiceError> {
        if self.within(self.repo.count_users_with_role(Role::SuperAdmin)).await? > 0 {
            return Err(ServiceError::Conflict("a super-admin already exists".into()));
        }
        models::user::validate_email(email)?;
        models::user::validate_name(name)?;
        let hash = self.credentials.hash_password(password).map_err(password_error)?;
        let user = self.within(self.repo.insert_user(blank_user(email, name, Role::SuperAdmin, None), hash)).await?;
        info!(user_id = %user.id, "super_admin_bootstrapped");
        Ok(user)
    }

    // ---- Business ----

    #[instrument(skip(self, actor, input), fields(user_id = %actor.user_id))]
    pub async fn create_business(&self, actor: &Actor, input: NewBusiness) -> Result<Business, ServiceError> {
        models::business::validate_name(&input.name)?;
        guard(actor, Action::CreateBusiness, Target::Global)?;

        let owner = match actor.role {
            Role::SuperAdmin => match input.owner_id {
                Some(owner_id) => {
                    let owner = self.load_user(owner_id).await?;
                    if owner.role != Role::Owner {
                        return Err(ServiceError::Validation("business owner must have the owner role".into()));
                    }
                    if owner.business_id.is_some() {
                        return Err(ServiceError::Conflict("owner already has a business".into()));
                    }
                    Some(owner_id)
                }
                None => None,
            },
            _ => Some(actor.user_id),
        };

        let code = self.codes.generate_business_code(&input.name).await?;
        let now = Utc::now();
        let business = Business {
            id: code.clone(),
            name: input.name.trim().to_string(),
            email: input.email,
            phone: input.phone,
            address: input.address,
            business_type: input.business_type.unwrap_or_else(|| DEFAULT_BUSINESS_TYPE.to_string()),
            property_ids: Vec::new(),
            owner_id: owner,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let created = self.within(self.repo.insert_business(business, owner)).await;
        if created.is_err() {
            self.retire(CodeScope::Business, &code).await;
        }
        let created = created?;
        info!(business_id = %created.id, owner_id = ?owner, "business_created");
        Ok(created)
    }

    pub async fn get_business(&self, actor: &Actor, id: &str) -> Result<Business, ServiceError> {
        guard(actor, Action::ReadBusiness, Target::Business(id))?;
        self.load_business(id).await
    }

    /// Super-admins see every business, everyone else at most their own.
    pub async fn list_businesses(&self, actor: &Actor) -> Result<Vec<Business>, ServiceError> {
        if actor.role == Role::SuperAdmin {
            return self.within(self.repo.list_businesses()).await;
        }
        match actor.business_id.as_deref() {
            Some(id) => Ok(self.within(self.repo.get_business(id)).await?.into_iter().collect()),
            None => Ok(Vec::new()),
        }
    }

    pub async fn update_business(&self, actor: &Actor, id: &str, patch: BusinessPatch) -> Result<Business, ServiceError> {
        if let Some(name) = &patch.name {
            models::business::validate_name(name)?;
        }
        guard(actor, Action::UpdateBusiness, Target::Business(id))?;
        let updated = self.within(self.repo.update_business(id, &patch)).await?;
        info!(business_id = %id, "business_updated");
        Ok(updated)
    }

    /// Only a business without properties can be deleted.
    pub async fn delete_business(&self, actor: &Actor, id: &str) -> Result<(), ServiceError> {
        guard(actor, Action::DeleteBusiness, Target::Business(id))?;
        self.within(self.repo.delete_business(id)).await?;
        info!(business_id = %id, "business_deleted");
        Ok(())
    }

    // ---- Property ----

    /// The first property of a business becomes its main property.
    #[instrument(skip(self, actor, input), fields(user_id = %actor.user_id, business_id = %business_id))]
    pub async fn create_property(&self, actor: &Actor, business_id: &str, input: NewProperty) -> Result<Property, ServiceError> {
        models::property::validate_name(&input.name)?;
        guard(actor, Action::CreateProperty, Target::Property { business_id, property_id: None })?;
        self.load_business(business_id).await?;

        let code = self.codes.generate_connection_code().await?;
        let now = Utc::now();
        let property = Property {
            id: Uuid::new_v4(),
            business_id: business_id.to_string(),
            name: input.name.trim().to_string(),
            address: input.address,
            is_main: false,
            connection_code: code.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let created = self.within(self.repo.create_property(property)).await;
        if created.is_err() {
            self.retire(CodeScope::Connection, &code).await;
        }
        let created = created?;
        info!(property_id = %created.id, is_main = created.is_main, "property_created");
        Ok(created)
    }

    pub async fn get_property(&self, actor: &Actor, id: Uuid) -> Result<Property, ServiceError> {
        let property = self.load_property(id).await?;
        guard(actor, Action::ReadProperty, Target::Property { business_id: &property.business_id, property_id: Some(id) })?;
        Ok(property)
    }

    /// Properties of `business_id` the actor can reach.
    pub async fn list_properties(&self, actor: &Actor, business_id: &str) -> Result<Vec<Property>, ServiceError> {
        guard(actor, Action::ReadBusiness, Target::Business(business_id))?;
        let all = self.within(self.repo.list_properties(business_id)).await?;
        Ok(all.into_iter().filter(|p| actor.can_reach_property(business_id, p.id)).collect())
    }

    pub async fn update_property(&self, actor: &Actor, id: Uuid, patch: PropertyPatch) -> Result<Property, ServiceError> {
        if let Some(name) = &patch.name {
            models::property::validate_name(name)?;
        }
        let property = self.load_property(id).await?;
        guard(actor, Action::UpdateProperty, Target::Property { business_id: &property.business_id, property_id: Some(id) })?;
        self.within(self.repo.update_property(id, &patch)).await
    }

    /// Promote `id` to main property; the previous main one is demoted.
    pub async fn set_main_property(&self, actor: &Actor, id: Uuid) -> Result<Property, ServiceError> {
        let property = self.load_property(id).await?;
        guard(actor, Action::UpdateBusiness, Target::Business(&property.business_id))?;
        let promoted = self.within(self.repo.set_main_property(id)).await?;
        info!(property_id = %id, business_id = %promoted.business_id, "main_property_changed");
        Ok(promoted)
    }

    /// Remove a property together with every reference to it. The main
    /// property is refused until another one is promoted.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete_property(&self, actor: &Actor, id: Uuid) -> Result<PropertyRemoval, ServiceError> {
        let property = self.load_property(id).await?;
        guard(actor, Action::DeleteProperty, Target::Property { business_id: &property.business_id, property_id: Some(id) })?;
        let removal = self.within(self.repo.delete_property(id)).await?;
        info!(
            property_id = %id,
            business_id = %removal.property.business_id,
            affected_users = removal.affected_users.len(),
            "property_deleted"
        );
        Ok(removal)
    }

    // ---- Join codes ----

    /// Look up what a join code points at. Needs no credential.
    pub async fn resolve_join_code(&self, raw: &str) -> Result<JoinTarget, ServiceError> {
        let code = JoinCode::parse(raw)?;
        let property = self
            .within(self.repo.find_property_by_code(code.as_str()))
            .await?
            .ok_or_else(|| ServiceError::not_found("join code"))?;
        let business = self.load_business(&property.business_id).await?;
        Ok(JoinTarget {
            property_id: property.id,
            property_name: property.name,
            business_id: business.id,
            business_name: business.name,
        })
    }

    /// Attach the actor to the property behind `raw`, placing it in the
    /// property's business first when it has none yet.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn join_property(&self, actor: &Actor, raw: &str) -> Result<User, ServiceError> {
        let target = self.resolve_join_code(raw).await?;
        guard(
            actor,
            Action::JoinProperty,
            Target::Property { business_id: &target.business_id, property_id: Some(target.property_id) },
        )?;
        if actor.business_id.is_none() {
            self.within(self.repo.assign_user_business(actor.user_id, Some(target.business_id.clone()))).await?;
        }
        let user = self.within(self.repo.grant_property_access(actor.user_id, target.property_id)).await?;
        info!(property_id = %target.property_id, business_id = %target.business_id, "property_joined");
        Ok(user)
    }

    // ---- User ----

    #[instrument(skip(self, actor, input), fields(user_id = %actor.user_id, email = %input.email, role = %input.role))]
    pub async fn create_user(&self, actor: &Actor, input: NewUser) -> Result<User, ServiceError> {
        models::user::validate_email(&input.email)?;
        models::user::validate_name(&input.name)?;
        let business_id = input.business_id.clone().or_else(|| actor.business_id.clone());
        let facts = UserFacts {
            id: None,
            role: input.role,
            business_id: business_id.as_deref(),
            property_access: &input.property_access,
        };
        guard(actor, Action::CreateUser { role: input.role }, Target::User(facts))?;
        if let Some(b) = &business_id {
            let business = self.load_business(b).await?;
            // 一个企业只能有一个所有者；所有者只能通过创建企业来绑定
            if input.role == Role::Owner {
                return Err(owner_conflict(&business));
            }
        } else if !input.property_access.is_empty() {
            return Err(ServiceError::Validation("property access requires a business".into()));
        }

        let hash = self.credentials.hash_password(&input.password).map_err(password_error)?;
        let mut user = blank_user(&input.email, &input.name, input.role, business_id);
        if input.role != Role::Owner {
            user.property_access = input.property_access;
        }
        let created = self.within(self.repo.insert_user(user, hash)).await?;
        info!(new_user_id = %created.id, "user_created");
        Ok(created)
    }

    pub async fn get_user(&self, actor: &Actor, id: Uuid) -> Result<User, ServiceError> {
        let user = self.load_user(id).await?;
        guard(actor, Action::ReadUser, Target::User(UserFacts::of(&user)))?;
        Ok(user)
    }

    /// Staff of a business. Employees may not list colleagues.
    pub async fn list_users(&self, actor: &Actor, business_id: &str) -> Result<Vec<User>, ServiceError> {
        guard(actor, Action::ReadBusiness, Target::Business(business_id))?;
        if actor.role == Role::Employee {
            return Err(ServiceError::Denied(authz::DenyReason::InsufficientRole));
        }
        self.within(self.repo.list_users_by_business(business_id)).await
    }

    /// Deactivating a user also revokes its sessions.
    pub async fn update_user(&self, actor: &Actor, id: Uuid, patch: UserPatch) -> Result<User, ServiceError> {
        if let Some(name) = &patch.name {
            models::user::validate_name(name)?;
        }
        let user = self.load_user(id).await?;
        guard(actor, Action::UpdateUser, Target::User(UserFacts::of(&user)))?;
        let updated = self.within(self.repo.update_user(id, &patch)).await?;
        if patch.is_active == Some(false) && user.is_active {
            self.credentials.revoke(id).await?;
        }
        Ok(updated)
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn change_role(&self, actor: &Actor, id: Uuid, role: Role) -> Result<User, ServiceError> {
        let user = self.load_user(id).await?;
        guard(actor, Action::AssignRole { role }, Target::User(UserFacts::of(&user)))?;
        if let Some(b) = &user.business_id {
            let business = self.load_business(b).await?;
            if role == Role::Owner {
                return Err(owner_conflict(&business));
            }
            if business.owner_id == Some(id) {
                return Err(ServiceError::Conflict(format!("user owns business {b}; it cannot be demoted")));
            }
        }
        let updated = self.within(self.repo.set_user_role(id, role)).await?;
        info!(target_user = %id, from = %user.role, to = %role, "role_changed");
        Ok(updated)
    }

    /// Owners of a business cannot be removed while the business exists.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete_user(&self, actor: &Actor, id: Uuid) -> Result<(), ServiceError> {
        let user = self.load_user(id).await?;
        guard(actor, Action::DeleteUser, Target::User(UserFacts::of(&user)))?;
        if let Some(b) = &user.business_id {
            if let Some(business) = self.within(self.repo.get_business(b)).await? {
                if business.owner_id == Some(id) {
                    return Err(ServiceError::Conflict(format!("user owns business {b}")));
                }
            }
        }
        self.within(self.repo.delete_user(id)).await?;
        info!(target_user = %id, "user_deleted");
        Ok(())
    }

    // ---- Access ----

    /// Moving a user to another business drops its property grants.
    pub async fn assign_user_to_business(&self, actor: &Actor, user_id: Uuid, business_id: &str) -> Result<User, ServiceError> {
        let user = self.load_user(user_id).await?;
        self.load_business(business_id).await?;
        guard(actor, Action::AssignBusiness, Target::Placement { user: UserFacts::of(&user), business_id })?;
        if user.role == Role::Owner {
            return Err(ServiceError::Conflict("owners stay with the business they own".into()));
        }
        let updated = self.within(self.repo.assign_user_business(user_id, Some(business_id.to_string()))).await?;
        info!(target_user = %user_id, business_id = %business_id, "user_assigned");
        Ok(updated)
    }

    pub async fn grant_property_access(&self, actor: &Actor, user_id: Uuid, property_id: Uuid) -> Result<User, ServiceError> {
        let user = self.load_user(user_id).await?;
        let property = self.load_property(property_id).await?;
        guard(
            actor,
            Action::GrantPropertyAccess,
            Target::Access { user: UserFacts::of(&user), business_id: &property.business_id, property_id },
        )?;
        let updated = self.within(self.repo.grant_property_access(user_id, property_id)).await?;
        info!(target_user = %user_id, property_id = %property_id, "property_access_granted");
        Ok(updated)
    }

    pub async fn revoke_property_access(&self, actor: &Actor, user_id: Uuid, property_id: Uuid) -> Result<User, ServiceError> {
        let user = self.load_user(user_id).await?;
        let property = self.load_property(property_id).await?;
        guard(
            actor,
            Action::RevokePropertyAccess,
            Target::Access { user: UserFacts::of(&user), business_id: &property.business_id, property_id },
        )?;
        let updated = self.within(self.repo.revoke_property_access(user_id, property_id)).await?;
        info!(target_user = %user_id, property_id = %property_id, "property_access_revoked");
        Ok(updated)
    }

    async fn retire(&self, scope: CodeScope, code: &str) {
        if let Err(e) = self.within(self.repo.retire_code(scope, code)).await {
            warn!(scope = %scope, code = %code, error = %e, "failed to retire unused code");
        }
    }
}

fn owner_conflict(business: &Business) -> ServiceError {
    match business.owner_id {
        Some(_) => ServiceError::Conflict(format!("business {} already has an owner", business.id)),
        None => ServiceError::Conflict(format!("business {} gets its owner when it is created", business.id)),
    }
}

fn blank_user(email: &str, name: &str, role: Role, business_id: Option<String>) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        email: normalize_email(email),
        name: name.trim().to_string(),
        role,
        business_id,
        property_access: Default::default(),
        is_active: true,
        session_version: 0,
        last_authenticated_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use crate::authz::DenyReason;
    use crate::repository::memory::MemoryTenantRepository;
    use std::collections::BTreeSet;

    type Svc = HierarchyService<MemoryTenantRepository>;

    fn service() -> (Arc<MemoryTenantRepository>, Svc) {
        let repo = Arc::new(MemoryTenantRepository::new());
        let creds = CredentialManager::new(
            repo.clone(),
            AuthConfig {
                jwt_secret: "test".into(),
                issuer: "test".into(),
                access_ttl_secs: 60,
                refresh_ttl_secs: 600,
                op_timeout: Duration::from_millis(500),
                min_password_len: 8,
            },
        );
        let svc = HierarchyService::new(repo.clone(), creds, 50, Duration::from_millis(500));
        (repo, svc)
    }

    fn new_user(email: &str, role: Role, access: BTreeSet<Uuid>) -> NewUser {
        NewUser {
            email: email.into(),
            name: "Staff".into(),
            password: "Passw0rd!".into(),
            role,
            business_id: None,
            property_access: access,
        }
    }

    async fn actor(svc: &Svc, id: Uuid) -> Actor {
        Actor::from_user(&svc.repository().get_user(id).await.unwrap().unwrap())
    }

    /// Super-admin, an owner with "Test Business" and its first property.
    async fn world() -> (Arc<MemoryTenantRepository>, Svc, Actor, Business, Property) {
        let (repo, svc) = service();
        let sa = svc.bootstrap_super_admin("root@example.com", "Root", "Passw0rd!").await.unwrap();
        let sa = Actor::from_user(&sa);
        let owner = svc.create_user(&sa, new_user("owner@example.com", Role::Owner, BTreeSet::new())).await.unwrap();
        let owner = actor(&svc, owner.id).await;
        let business = svc.create_business(&owner, NewBusiness { name: "Test Business".into(), ..Default::default() }).await.unwrap();
        let owner = actor(&svc, owner.user_id).await;
        let first = svc.create_property(&owner, &business.id, NewProperty { name: "Main St".into(), address: None }).await.unwrap();
        (repo, svc, owner, business, first)
    }

    #[tokio::test]
    async fn first_property_is_main() {
        let (repo, svc, owner, business, first) = world().await;
        assert!(business.id.starts_with("TEST"));
        assert!(first.is_main);
        let second = svc.create_property(&owner, &business.id, NewProperty { name: "Harbor".into(), address: None }).await.unwrap();
        assert!(!second.is_main);

        let listed = svc.list_properties(&owner, &business.id).await.unwrap();
        assert_eq!(listed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![first.id, second.id]);
        assert_eq!(svc.get_business(&owner, &business.id).await.unwrap().property_ids, vec![first.id, second.id]);
        assert!(repo.businesses_with_multiple_mains().is_empty());
    }

    #[tokio::test]
    async fn main_property_is_protected_until_promoted() {
        let (repo, svc, owner, business, first) = world().await;
        let second = svc.create_property(&owner, &business.id, NewProperty { name: "Harbor".into(), address: None }).await.unwrap();

        assert!(matches!(svc.delete_property(&owner, first.id).await, Err(ServiceError::Conflict(_))));
        let promoted = svc.set_main_property(&owner, second.id).await.unwrap();
        assert!(promoted.is_main);
        assert!(!svc.get_property(&owner, first.id).await.unwrap().is_main);
        assert!(repo.businesses_with_multiple_mains().is_empty());

        svc.delete_property(&owner, first.id).await.unwrap();
        assert_eq!(svc.get_business(&owner, &business.id).await.unwrap().property_ids, vec![second.id]);
        assert!(repo.is_code_retired(CodeScope::Connection, &first.connection_code));
    }

    #[tokio::test]
    async fn delete_property_strips_every_reference() {
        let (repo, svc, owner, business, main) = world().await;
        let doomed = svc.create_property(&owner, &business.id, NewProperty { name: "Harbor".into(), address: None }).await.unwrap();
        let access: BTreeSet<Uuid> = [main.id, doomed.id].into_iter().collect();
        let a = svc.create_user(&owner, new_user("a@example.com", Role::Employee, access.clone())).await.unwrap();
        let b = svc.create_user(&owner, new_user("b@example.com", Role::Manager, access)).await.unwrap();

        let removal = svc.delete_property(&owner, doomed.id).await.unwrap();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(removal.affected_users, expected);

        for id in [a.id, b.id] {
            let u = repo.get_user(id).await.unwrap().unwrap();
            assert!(!u.property_access.contains(&doomed.id));
            assert!(u.property_access.contains(&main.id));
        }
        assert!(!repo.get_business(&business.id).await.unwrap().unwrap().property_ids.contains(&doomed.id));
        assert!(repo.get_property(doomed.id).await.unwrap().is_none());
        assert!(matches!(svc.resolve_join_code(&doomed.connection_code).await, Err(ServiceError::NotFound(_))));
    }

    // Readers racing a delete must see the property either everywhere or nowhere.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_property_is_atomic_for_readers() {
        let (repo, svc, owner, business, main) = world().await;
        let doomed = svc.create_property(&owner, &business.id, NewProperty { name: "Harbor".into(), address: None }).await.unwrap();
        let access: BTreeSet<Uuid> = [main.id, doomed.id].into_iter().collect();
        let a = svc.create_user(&owner, new_user("a@example.com", Role::Employee, access.clone())).await.unwrap();
        let b = svc.create_user(&owner, new_user("b@example.com", Role::Employee, access)).await.unwrap();

        let reader_repo = repo.clone();
        let bid = business.id.clone();
        let (a_id, b_id, doomed_id) = (a.id, b.id, doomed.id);
        let reader = tokio::spawn(async move {
            for _ in 0..500 {
                let snapshot = reader_repo.access_snapshot();
                let in_a = snapshot[&a_id].contains(&doomed_id);
                let in_b = snapshot[&b_id].contains(&doomed_id);
                assert_eq!(in_a, in_b, "users observed in different states");
                let _ = reader_repo.get_business(&bid).await;
                tokio::task::yield_now().await;
            }
        });
        svc.delete_property(&owner, doomed.id).await.unwrap();
        reader.await.unwrap();
        assert!(repo.users_with_foreign_grants().is_empty());
    }

    #[tokio::test]
    async fn manager_scenarios() {
        let (_repo, svc, owner, business, main) = world().await;
        let other = svc.create_property(&owner, &business.id, NewProperty { name: "Harbor".into(), address: None }).await.unwrap();
        let manager = svc
            .create_user(&owner, new_user("m@example.com", Role::Manager, [main.id].into_iter().collect()))
            .await
            .unwrap();
        let manager = actor(&svc, manager.id).await;

        let denied = svc.create_user(&manager, new_user("o2@example.com", Role::Owner, BTreeSet::new())).await;
        assert!(matches!(denied, Err(ServiceError::Denied(DenyReason::InsufficientRole))));

        let employee = svc
            .create_user(&manager, new_user("e@example.com", Role::Employee, [main.id].into_iter().collect()))
            .await
            .unwrap();
        assert_eq!(employee.business_id.as_deref(), Some(business.id.as_str()));

        let out = svc
            .create_user(&manager, new_user("e2@example.com", Role::Employee, [other.id].into_iter().collect()))
            .await;
        assert!(matches!(out, Err(ServiceError::Denied(DenyReason::PropertyOutOfScope))));

        // managers only see properties they were granted
        let visible = svc.list_properties(&manager, &business.id).await.unwrap();
        assert_eq!(visible.iter().map(|p| p.id).collect::<Vec<_>>(), vec![main.id]);
    }

    #[tokio::test]
    async fn cross_tenant_grants_are_rejected() {
        let (repo, svc, owner, _business, main) = world().await;
        let sa = Actor::from_user(&repo.find_user_by_email("root@example.com").await.unwrap().unwrap());
        let owner2 = svc.create_user(&sa, new_user("owner2@example.com", Role::Owner, BTreeSet::new())).await.unwrap();
        let owner2 = actor(&svc, owner2.id).await;
        let biz2 = svc.create_business(&owner2, NewBusiness { name: "Other".into(), ..Default::default() }).await.unwrap();
        let owner2 = actor(&svc, owner2.user_id).await;
        let p2 = svc.create_property(&owner2, &biz2.id, NewProperty { name: "Far".into(), address: None }).await.unwrap();

        let staff = svc.create_user(&owner, new_user("s@example.com", Role::Employee, BTreeSet::new())).await.unwrap();
        let res = svc.grant_property_access(&owner, staff.id, p2.id).await;
        assert!(matches!(res, Err(ServiceError::Denied(DenyReason::CrossTenantAccess))));
        let res = svc.grant_property_access(&sa, staff.id, p2.id).await;
        assert!(matches!(res, Err(ServiceError::Denied(DenyReason::CrossTenantAccess))));

        svc.grant_property_access(&owner, staff.id, main.id).await.unwrap();
        let res = svc.get_business(&owner2, "TEST0000").await;
        assert!(matches!(res, Err(ServiceError::Denied(DenyReason::CrossTenantAccess))));
        assert!(repo.users_with_foreign_grants().is_empty());

        // moving the user wipes grants from the old business
        let moved = svc.assign_user_to_business(&sa, staff.id, &biz2.id).await.unwrap();
        assert!(moved.property_access.is_empty());
    }

    #[tokio::test]
    async fn join_by_code_places_new_staff() {
        let (repo, svc, _owner, business, main) = world().await;
        let sa = Actor::from_user(&repo.find_user_by_email("root@example.com").await.unwrap().unwrap());
        let loose = svc.create_user(&sa, new_user("new@example.com", Role::Employee, BTreeSet::new())).await.unwrap();
        assert!(loose.business_id.is_none());

        let target = svc.resolve_join_code(&main.connection_code).await.unwrap();
        assert_eq!(target.business_id, business.id);
        assert_eq!(target.property_id, main.id);

        let joined = svc.join_property(&actor(&svc, loose.id).await, &main.connection_code).await.unwrap();
        assert_eq!(joined.business_id.as_deref(), Some(business.id.as_str()));
        assert!(joined.property_access.contains(&main.id));

        assert!(matches!(svc.resolve_join_code("12a").await, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn scoped_staff_cannot_join_sibling_properties() {
        let (repo, svc, owner, business, main) = world().await;
        let sibling = svc.create_property(&owner, &business.id, NewProperty { name: "Harbor".into(), address: None }).await.unwrap();
        let manager = svc
            .create_user(&owner, new_user("m@example.com", Role::Manager, [main.id].into_iter().collect()))
            .await
            .unwrap();
        let manager = actor(&svc, manager.id).await;

        let direct = svc.grant_property_access(&manager, manager.user_id, sibling.id).await;
        assert!(matches!(direct, Err(ServiceError::Denied(_))));
        let joined = svc.join_property(&manager, &sibling.connection_code).await;
        assert!(matches!(joined, Err(ServiceError::Denied(DenyReason::PropertyOutOfScope))));

        let stored = repo.get_user(manager.user_id).await.unwrap().unwrap();
        assert_eq!(stored.property_access, [main.id].into_iter().collect::<BTreeSet<_>>());
    }

    #[tokio::test]
    async fn each_business_keeps_a_single_owner() {
        let (repo, svc, owner, business, _main) = world().await;
        let sa = Actor::from_user(&repo.find_user_by_email("root@example.com").await.unwrap().unwrap());

        let mut second = new_user("owner2@example.com", Role::Owner, BTreeSet::new());
        second.business_id = Some(business.id.clone());
        assert!(matches!(svc.create_user(&sa, second).await, Err(ServiceError::Conflict(_))));

        // the recorded owner cannot be demoted or moved out from under the business
        assert!(matches!(svc.change_role(&sa, owner.user_id, Role::Manager).await, Err(ServiceError::Conflict(_))));
        let stored = svc.get_business(&owner, &business.id).await.unwrap();
        assert_eq!(stored.owner_id, Some(owner.user_id));
        assert_eq!(repo.get_user(owner.user_id).await.unwrap().unwrap().role, Role::Owner);

        let staff = svc.create_user(&owner, new_user("s@example.com", Role::Employee, BTreeSet::new())).await.unwrap();
        assert!(matches!(svc.change_role(&sa, staff.id, Role::Owner).await, Err(ServiceError::Conflict(_))));
        svc.change_role(&owner, staff.id, Role::Manager).await.unwrap();
    }

    #[tokio::test]
    async fn owner_deletion_and_super_admin_rules() {
        let (repo, svc, owner, _business, _main) = world().await;
        let sa = Actor::from_user(&repo.find_user_by_email("root@example.com").await.unwrap().unwrap());
        assert!(matches!(svc.delete_user(&sa, owner.user_id).await, Err(ServiceError::Conflict(_))));

        let second_sa = repo
            .insert_user(blank_user("root2@example.com", "Root2", Role::SuperAdmin, None), "x".into())
            .await
            .unwrap();
        assert!(matches!(
            svc.delete_user(&sa, second_sa.id).await,
            Err(ServiceError::Denied(DenyReason::SelfDeleteOnly))
        ));
        svc.delete_user(&Actor::from_user(&second_sa), second_sa.id).await.unwrap();
        assert!(matches!(
            svc.bootstrap_super_admin("again@example.com", "Again", "Passw0rd!").await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn owner_cannot_own_two_businesses() {
        let (_repo, svc, owner, _business, _main) = world().await;
        let res = svc.create_business(&owner, NewBusiness { name: "Second".into(), ..Default::default() }).await;
        assert!(matches!(res, Err(ServiceError::Denied(DenyReason::BusinessAlreadyAssigned))));
    }

    #[tokio::test]
    async fn business_with_properties_cannot_be_deleted() {
        let (_repo, svc, owner, business, _main) = world().await;
        assert!(matches!(svc.delete_business(&owner, &business.id).await, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn demotion_applies_on_next_request() {
        let (_repo, svc, owner, _business, main) = world().await;
        let m = svc
            .create_user(&owner, new_user("m@example.com", Role::Manager, [main.id].into_iter().collect()))
            .await
            .unwrap();
        let pair = svc.credentials().issue(&m).unwrap();
        svc.change_role(&owner, m.id, Role::Employee).await.unwrap();

        let claims = svc.credentials().verify(&pair.access_token).unwrap();
        assert_eq!(claims.role, Role::Manager);
        let now = svc.actor_for(&claims).await.unwrap();
        assert_eq!(now.role, Role::Employee);
    }

    #[tokio::test]
    async fn deactivation_revokes_sessions() {
        let (_repo, svc, owner, _business, _main) = world().await;
        let e = svc.create_user(&owner, new_user("e@example.com", Role::Employee, BTreeSet::new())).await.unwrap();
        let pair = svc.credentials().issue(&e).unwrap();
        svc.update_user(&owner, e.id, UserPatch { name: None, is_active: Some(false) }).await.unwrap();
        assert_eq!(svc.credentials().refresh(&pair.refresh_token).await.unwrap_err(), AuthError::Revoked);
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_remote_unavailable() {
        let (repo, svc, owner, business, _main) = world().await;
        repo.set_offline(true);
        let err = svc.get_business(&owner, &business.id).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "RemoteUnavailable");
    }

    #[tokio::test]
    async fn weak_password_is_a_validation_error() {
        let (_repo, svc, owner, _business, _main) = world().await;
        let mut input = new_user("w@example.com", Role::Employee, BTreeSet::new());
        input.password = "short".into();
        assert!(matches!(svc.create_user(&owner, input).await, Err(ServiceError::Validation(_))));
    }
}
