//! Authorization guard.
//!
//! `authorize` is pure and synchronous: it only looks at the acting user's
//! role and ownership scope plus the facts about the target that the caller
//! already loaded, so it can run inline on every request.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{Role, User};
use crate::errors::ServiceError;

/// Stable, machine-checkable denial reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DenyReason {
    CrossTenantAccess,
    InsufficientRole,
    SelfDeleteOnly,
    PeerModification,
    PropertyOutOfScope,
    BusinessAlreadyAssigned,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::CrossTenantAccess => "CrossTenantAccess",
            DenyReason::InsufficientRole => "InsufficientRole",
            DenyReason::SelfDeleteOnly => "SelfDeleteOnly",
            DenyReason::PeerModification => "PeerModification",
            DenyReason::PropertyOutOfScope => "PropertyOutOfScope",
            DenyReason::BusinessAlreadyAssigned => "BusinessAlreadyAssigned",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The acting identity, resolved from a verified credential plus a fresh
/// read of the user record.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    pub business_id: Option<String>,
    pub property_access: BTreeSet<Uuid>,
}

impl Actor {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
            business_id: user.business_id.clone(),
            property_access: user.property_access.clone(),
        }
    }

    /// Owners reach every property of their business without explicit grants.
    pub fn can_reach_property(&self, business_id: &str, property_id: Uuid) -> bool {
        match self.role {
            Role::SuperAdmin => true,
            Role::Owner => self.business_id.as_deref() == Some(business_id),
            _ => self.business_id.as_deref() == Some(business_id) && self.property_access.contains(&property_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CreateBusiness,
    ReadBusiness,
    UpdateBusiness,
    DeleteBusiness,
    CreateProperty,
    ReadProperty,
    UpdateProperty,
    DeleteProperty,
    CreateUser,
    ReadUser,
    UpdateUser,
    DeleteUser,
    AssignRole,
    AssignBusiness,
    GrantPropertyAccess,
    RevokePropertyAccess,
    JoinProperty,
}

impl ActionKind {
    pub const ALL: [ActionKind; 17] = [
        ActionKind::CreateBusiness,
        ActionKind::ReadBusiness,
        ActionKind::UpdateBusiness,
        ActionKind::DeleteBusiness,
        ActionKind::CreateProperty,
        ActionKind::ReadProperty,
        ActionKind::UpdateProperty,
        ActionKind::DeleteProperty,
        ActionKind::CreateUser,
        ActionKind::ReadUser,
        ActionKind::UpdateUser,
        ActionKind::DeleteUser,
        ActionKind::AssignRole,
        ActionKind::AssignBusiness,
        ActionKind::GrantPropertyAccess,
        ActionKind::RevokePropertyAccess,
        ActionKind::JoinProperty,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateBusiness,
    ReadBusiness,
    UpdateBusiness,
    DeleteBusiness,
    CreateProperty,
    ReadProperty,
    UpdateProperty,
    DeleteProperty,
    /// Creating a user with the given role.
    CreateUser { role: Role },
    ReadUser,
    UpdateUser,
    DeleteUser,
    /// Granting the given role to an existing user.
    AssignRole { role: Role },
    AssignBusiness,
    GrantPropertyAccess,
    RevokePropertyAccess,
    JoinProperty,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::CreateBusiness => ActionKind::CreateBusiness,
            Action::ReadBusiness => ActionKind::ReadBusiness,
            Action::UpdateBusiness => ActionKind::UpdateBusiness,
            Action::DeleteBusiness => ActionKind::DeleteBusiness,
            Action::CreateProperty => ActionKind::CreateProperty,
            Action::ReadProperty => ActionKind::ReadProperty,
            Action::UpdateProperty => ActionKind::UpdateProperty,
            Action::DeleteProperty => ActionKind::DeleteProperty,
            Action::CreateUser { .. } => ActionKind::CreateUser,
            Action::ReadUser => ActionKind::ReadUser,
            Action::UpdateUser => ActionKind::UpdateUser,
            Action::DeleteUser => ActionKind::DeleteUser,
            Action::AssignRole { .. } => ActionKind::AssignRole,
            Action::AssignBusiness => ActionKind::AssignBusiness,
            Action::GrantPropertyAccess => ActionKind::GrantPropertyAccess,
            Action::RevokePropertyAccess => ActionKind::RevokePropertyAccess,
            Action::JoinProperty => ActionKind::JoinProperty,
        }
    }
}

/// Facts about a (possibly not yet existing) user the guard needs.
#[derive(Debug, Clone, Copy)]
pub struct UserFacts<'a> {
    /// `None` while the user is being created.
    pub id: Option<Uuid>,
    pub role: Role,
    pub business_id: Option<&'a str>,
    pub property_access: &'a BTreeSet<Uuid>,
}

impl<'a> UserFacts<'a> {
    pub fn of(user: &'a User) -> Self {
        Self {
            id: Some(user.id),
            role: user.role,
            business_id: user.business_id.as_deref(),
            property_access: &user.property_access,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// No existing entity (business creation).
    Global,
    Business(&'a str),
    /// `property_id` is `None` while the property is being created.
    Property { business_id: &'a str, property_id: Option<Uuid> },
    User(UserFacts<'a>),
    /// Moving a user into `business_id`.
    Placement { user: UserFacts<'a>, business_id: &'a str },
    /// Granting or revoking `property_id` (owned by `business_id`) on `user`.
    Access { user: UserFacts<'a>, business_id: &'a str, property_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool { matches!(self, Decision::Allow) }

    pub fn into_result(self) -> Result<(), ServiceError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(ServiceError::Denied(reason)),
        }
    }
}

/// Role-level allow table, checked before any scope rule.
pub fn role_permits(role: Role, kind: ActionKind) -> bool {
    use ActionKind::*;
    use Role::*;
    match kind {
        ReadBusiness | ReadProperty | ReadUser => true,
        CreateBusiness | UpdateBusiness | DeleteBusiness | CreateProperty | DeleteProperty | AssignBusiness => {
            matches!(role, SuperAdmin | Owner)
        }
        UpdateProperty | CreateUser | UpdateUser | DeleteUser | AssignRole | GrantPropertyAccess | RevokePropertyAccess => {
            matches!(role, SuperAdmin | Owner | Manager)
        }
        JoinProperty => matches!(role, Manager | Employee),
    }
}

pub fn authorize(actor: &Actor, action: &Action, target: &Target<'_>) -> Decision {
    if !role_permits(actor.role, action.kind()) {
        return Decision::Deny(DenyReason::InsufficientRole);
    }
    let verdict = match actor.role {
        Role::SuperAdmin => super_admin_rules(actor, action, target),
        _ => scoped_rules(actor, action, target),
    };
    match verdict {
        Ok(()) => Decision::Allow,
        Err(reason) => Decision::Deny(reason),
    }
}

fn super_admin_rules(actor: &Actor, action: &Action, target: &Target<'_>) -> Result<(), DenyReason> {
    match (action, target) {
        (Action::DeleteUser, Target::User(u)) if u.role == Role::SuperAdmin && u.id != Some(actor.user_id) => {
            Err(DenyReason::SelfDeleteOnly)
        }
        (Action::AssignRole { role }, Target::User(u)) => grant_rank(actor, *role, u),
        (Action::CreateUser { role }, _) => outranks(actor, *role),
        (Action::GrantPropertyAccess, Target::Access { user, business_id, .. }) => same_tenant(user.business_id, business_id),
        (Action::AssignBusiness, Target::Placement { user, .. }) => outranks(actor, user.role),
        _ => Ok(()),
    }
}

fn scoped_rules(actor: &Actor, action: &Action, target: &Target<'_>) -> Result<(), DenyReason> {
    let own = actor.business_id.as_deref();
    match (action, target) {
        (Action::CreateBusiness, _) => match own {
            Some(_) => Err(DenyReason::BusinessAlreadyAssigned),
            None => Ok(()),
        },
        (_, Target::Global) => Err(DenyReason::InsufficientRole),

        // Joining only onboards staff with no grants yet; widening an
        // existing scope goes through GrantPropertyAccess.
        (Action::JoinProperty, Target::Property { business_id, property_id }) => match own {
            None => Ok(()),
            Some(b) if b != *business_id => Err(DenyReason::CrossTenantAccess),
            Some(_) if actor.property_access.is_empty() => Ok(()),
            Some(_) if property_id.is_some_and(|p| actor.property_access.contains(&p)) => Ok(()),
            Some(_) => Err(DenyReason::PropertyOutOfScope),
        },
        (_, Target::Business(id)) => same_tenant(own, id),
        (_, Target::Property { business_id, property_id }) => {
            same_tenant(own, business_id)?;
            match (actor.role, property_id) {
                (Role::Owner, _) => Ok(()),
                (_, Some(p)) if actor.property_access.contains(p) => Ok(()),
                _ => Err(DenyReason::PropertyOutOfScope),
            }
        }

        (Action::ReadUser | Action::UpdateUser, Target::User(u)) if u.id == Some(actor.user_id) => Ok(()),
        (Action::ReadUser, Target::User(u)) => {
            same_tenant(own, u.business_id.unwrap_or_default())?;
            if actor.role == Role::Employee { Err(DenyReason::InsufficientRole) } else { Ok(()) }
        }
        (Action::CreateUser { role }, Target::User(u)) => {
            same_tenant(own, u.business_id.unwrap_or_default())?;
            outranks(actor, *role)?;
            within_scope(actor, u.property_access)
        }
        (Action::AssignRole { role }, Target::User(u)) => {
            administer(actor, u)?;
            grant_rank(actor, *role, u)
        }
        (Action::UpdateUser | Action::DeleteUser, Target::User(u)) => administer(actor, u),

        (Action::AssignBusiness, Target::Placement { user, business_id }) => {
            same_tenant(own, business_id)?;
            if let Some(current) = user.business_id {
                same_tenant(own, current)?;
            }
            outranks(actor, user.role)
        }
        (Action::GrantPropertyAccess | Action::RevokePropertyAccess, Target::Access { user, business_id, property_id }) => {
            administer(actor, user)?;
            same_tenant(own, business_id)?;
            if actor.role == Role::Owner || actor.property_access.contains(property_id) {
                Ok(())
            } else {
                Err(DenyReason::PropertyOutOfScope)
            }
        }
        _ => Err(DenyReason::InsufficientRole),
    }
}

fn same_tenant(own: Option<&str>, business_id: &str) -> Result<(), DenyReason> {
    if own == Some(business_id) { Ok(()) } else { Err(DenyReason::CrossTenantAccess) }
}

fn outranks(actor: &Actor, role: Role) -> Result<(), DenyReason> {
    if actor.role.outranks(role) { Ok(()) } else { Err(DenyReason::InsufficientRole) }
}

/// The granted role and the target's current role must both rank below the actor.
fn grant_rank(actor: &Actor, role: Role, target: &UserFacts<'_>) -> Result<(), DenyReason> {
    outranks(actor, role)?;
    outranks(actor, target.role)
}

fn within_scope(actor: &Actor, access: &BTreeSet<Uuid>) -> Result<(), DenyReason> {
    if actor.role == Role::Owner || access.is_subset(&actor.property_access) {
        Ok(())
    } else {
        Err(DenyReason::PropertyOutOfScope)
    }
}

/// Administrative rights over an existing user of the actor's business.
fn administer(actor: &Actor, target: &UserFacts<'_>) -> Result<(), DenyReason> {
    same_tenant(actor.business_id.as_deref(), target.business_id.unwrap_or_default())?;
    if target.id == Some(actor.user_id) {
        return Err(DenyReason::InsufficientRole);
    }
    match actor.role {
        Role::Owner if target.role >= Role::Owner => Err(DenyReason::InsufficientRole),
        Role::Owner => Ok(()),
        Role::Manager if target.role == Role::Manager => Err(DenyReason::PeerModification),
        Role::Manager if target.role > Role::Manager => Err(DenyReason::InsufficientRole),
        Role::Manager => within_scope(actor, target.property_access),
        _ => Err(DenyReason::InsufficientRole),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIZ: &str = "TEST0001";
    const OTHER: &str = "OTHR0002";

    fn actor(role: Role, business: Option<&str>, access: &[Uuid]) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            role,
            business_id: business.map(str::to_string),
            property_access: access.iter().copied().collect(),
        }
    }

    fn facts<'a>(role: Role, business: Option<&'a str>, access: &'a BTreeSet<Uuid>) -> UserFacts<'a> {
        UserFacts { id: Some(Uuid::new_v4()), role, business_id: business, property_access: access }
    }

    fn deny(reason: DenyReason) -> Decision { Decision::Deny(reason) }

    #[test]
    fn allow_table_is_exact() {
        use ActionKind::*;
        let expected: &[(ActionKind, &[Role])] = &[
            (CreateBusiness, &[Role::SuperAdmin, Role::Owner]),
            (ReadBusiness, &Role::ALL),
            (UpdateBusiness, &[Role::SuperAdmin, Role::Owner]),
            (DeleteBusiness, &[Role::SuperAdmin, Role::Owner]),
            (CreateProperty, &[Role::SuperAdmin, Role::Owner]),
            (ReadProperty, &Role::ALL),
            (UpdateProperty, &[Role::SuperAdmin, Role::Owner, Role::Manager]),
            (DeleteProperty, &[Role::SuperAdmin, Role::Owner]),
            (CreateUser, &[Role::SuperAdmin, Role::Owner, Role::Manager]),
            (ReadUser, &Role::ALL),
            (UpdateUser, &[Role::SuperAdmin, Role::Owner, Role::Manager]),
            (DeleteUser, &[Role::SuperAdmin, Role::Owner, Role::Manager]),
            (AssignRole, &[Role::SuperAdmin, Role::Owner, Role::Manager]),
            (AssignBusiness, &[Role::SuperAdmin, Role::Owner]),
            (GrantPropertyAccess, &[Role::SuperAdmin, Role::Owner, Role::Manager]),
            (RevokePropertyAccess, &[Role::SuperAdmin, Role::Owner, Role::Manager]),
            (JoinProperty, &[Role::Manager, Role::Employee]),
        ];
        assert_eq!(expected.len(), ActionKind::ALL.len());
        for (kind, allowed) in expected {
            for role in Role::ALL {
                assert_eq!(role_permits(role, *kind), allowed.contains(&role), "{role} / {kind:?}");
            }
        }
    }

    #[test]
    fn super_admin_only_deletes_self() {
        let sa = actor(Role::SuperAdmin, None, &[]);
        let none = BTreeSet::new();
        let other = facts(Role::SuperAdmin, None, &none);
        assert_eq!(authorize(&sa, &Action::DeleteUser, &Target::User(other)), deny(DenyReason::SelfDeleteOnly));

        let me = UserFacts { id: Some(sa.user_id), ..other };
        assert!(authorize(&sa, &Action::DeleteUser, &Target::User(me)).is_allowed());
        let owner = facts(Role::Owner, Some(BIZ), &none);
        assert!(authorize(&sa, &Action::DeleteUser, &Target::User(owner)).is_allowed());
        assert!(authorize(&sa, &Action::DeleteBusiness, &Target::Business(OTHER)).is_allowed());
    }

    #[test]
    fn owner_is_confined_to_own_business() {
        let owner = actor(Role::Owner, Some(BIZ), &[]);
        assert!(authorize(&owner, &Action::UpdateBusiness, &Target::Business(BIZ)).is_allowed());
        assert_eq!(authorize(&owner, &Action::UpdateBusiness, &Target::Business(OTHER)), deny(DenyReason::CrossTenantAccess));
        let prop = Target::Property { business_id: OTHER, property_id: Some(Uuid::new_v4()) };
        assert_eq!(authorize(&owner, &Action::DeleteProperty, &prop), deny(DenyReason::CrossTenantAccess));
        // implicit access to every property of the business
        let mine = Target::Property { business_id: BIZ, property_id: Some(Uuid::new_v4()) };
        assert!(authorize(&owner, &Action::DeleteProperty, &mine).is_allowed());
    }

    #[test]
    fn owner_creates_staff_but_not_peers() {
        let owner = actor(Role::Owner, Some(BIZ), &[]);
        let none = BTreeSet::new();
        let new_user = UserFacts { id: None, role: Role::Manager, business_id: Some(BIZ), property_access: &none };
        assert!(authorize(&owner, &Action::CreateUser { role: Role::Manager }, &Target::User(new_user)).is_allowed());
        assert_eq!(
            authorize(&owner, &Action::CreateUser { role: Role::Owner }, &Target::User(new_user)),
            deny(DenyReason::InsufficientRole)
        );
        let other_owner = facts(Role::Owner, Some(BIZ), &none);
        assert_eq!(authorize(&owner, &Action::DeleteUser, &Target::User(other_owner)), deny(DenyReason::InsufficientRole));
    }

    #[test]
    fn owner_with_business_cannot_create_another() {
        let owner = actor(Role::Owner, Some(BIZ), &[]);
        assert_eq!(authorize(&owner, &Action::CreateBusiness, &Target::Global), deny(DenyReason::BusinessAlreadyAssigned));
        let fresh = actor(Role::Owner, None, &[]);
        assert!(authorize(&fresh, &Action::CreateBusiness, &Target::Global).is_allowed());
    }

    #[test]
    fn manager_creating_users() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let manager = actor(Role::Manager, Some(BIZ), &[p1]);
        let in_scope: BTreeSet<Uuid> = [p1].into_iter().collect();
        let out_of_scope: BTreeSet<Uuid> = [p2].into_iter().collect();

        let as_owner = UserFacts { id: None, role: Role::Owner, business_id: Some(BIZ), property_access: &in_scope };
        assert_eq!(
            authorize(&manager, &Action::CreateUser { role: Role::Owner }, &Target::User(as_owner)),
            deny(DenyReason::InsufficientRole)
        );
        let employee = UserFacts { role: Role::Employee, ..as_owner };
        assert!(authorize(&manager, &Action::CreateUser { role: Role::Employee }, &Target::User(employee)).is_allowed());
        let elsewhere = UserFacts { property_access: &out_of_scope, ..employee };
        assert_eq!(
            authorize(&manager, &Action::CreateUser { role: Role::Employee }, &Target::User(elsewhere)),
            deny(DenyReason::PropertyOutOfScope)
        );
        let peer = UserFacts { role: Role::Manager, ..employee };
        assert_eq!(
            authorize(&manager, &Action::CreateUser { role: Role::Manager }, &Target::User(peer)),
            deny(DenyReason::InsufficientRole)
        );
    }

    #[test]
    fn manager_cannot_touch_peers_or_escalate() {
        let p1 = Uuid::new_v4();
        let manager = actor(Role::Manager, Some(BIZ), &[p1]);
        let access: BTreeSet<Uuid> = [p1].into_iter().collect();
        let peer = facts(Role::Manager, Some(BIZ), &access);
        assert_eq!(authorize(&manager, &Action::UpdateUser, &Target::User(peer)), deny(DenyReason::PeerModification));
        let employee = facts(Role::Employee, Some(BIZ), &access);
        assert!(authorize(&manager, &Action::UpdateUser, &Target::User(employee)).is_allowed());
        assert_eq!(
            authorize(&manager, &Action::AssignRole { role: Role::Manager }, &Target::User(employee)),
            deny(DenyReason::InsufficientRole)
        );
        let foreign = facts(Role::Employee, Some(OTHER), &access);
        assert_eq!(authorize(&manager, &Action::DeleteUser, &Target::User(foreign)), deny(DenyReason::CrossTenantAccess));
    }

    #[test]
    fn role_assignment_needs_strict_rank() {
        let owner = actor(Role::Owner, Some(BIZ), &[]);
        let none = BTreeSet::new();
        let employee = facts(Role::Employee, Some(BIZ), &none);
        assert!(authorize(&owner, &Action::AssignRole { role: Role::Manager }, &Target::User(employee)).is_allowed());
        assert_eq!(
            authorize(&owner, &Action::AssignRole { role: Role::Owner }, &Target::User(employee)),
            deny(DenyReason::InsufficientRole)
        );
        let sa = actor(Role::SuperAdmin, None, &[]);
        assert!(authorize(&sa, &Action::AssignRole { role: Role::Owner }, &Target::User(employee)).is_allowed());
        assert_eq!(
            authorize(&sa, &Action::AssignRole { role: Role::SuperAdmin }, &Target::User(employee)),
            deny(DenyReason::InsufficientRole)
        );
    }

    #[test]
    fn grants_stay_inside_the_business() {
        let p_other = Uuid::new_v4();
        let none = BTreeSet::new();
        let employee = facts(Role::Employee, Some(BIZ), &none);
        let target = Target::Access { user: employee, business_id: OTHER, property_id: p_other };

        let owner = actor(Role::Owner, Some(BIZ), &[]);
        assert_eq!(authorize(&owner, &Action::GrantPropertyAccess, &target), deny(DenyReason::CrossTenantAccess));
        let sa = actor(Role::SuperAdmin, None, &[]);
        assert_eq!(authorize(&sa, &Action::GrantPropertyAccess, &target), deny(DenyReason::CrossTenantAccess));

        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let manager = actor(Role::Manager, Some(BIZ), &[p1]);
        let ok = Target::Access { user: employee, business_id: BIZ, property_id: p1 };
        assert!(authorize(&manager, &Action::GrantPropertyAccess, &ok).is_allowed());
        let out = Target::Access { user: employee, business_id: BIZ, property_id: p2 };
        assert_eq!(authorize(&manager, &Action::GrantPropertyAccess, &out), deny(DenyReason::PropertyOutOfScope));
    }

    #[test]
    fn employee_reads_only() {
        let p1 = Uuid::new_v4();
        let employee = actor(Role::Employee, Some(BIZ), &[p1]);
        assert!(authorize(&employee, &Action::ReadBusiness, &Target::Business(BIZ)).is_allowed());
        assert!(authorize(&employee, &Action::ReadProperty, &Target::Property { business_id: BIZ, property_id: Some(p1) }).is_allowed());
        assert_eq!(
            authorize(&employee, &Action::ReadProperty, &Target::Property { business_id: BIZ, property_id: Some(Uuid::new_v4()) }),
            deny(DenyReason::PropertyOutOfScope)
        );
        assert_eq!(authorize(&employee, &Action::UpdateBusiness, &Target::Business(BIZ)), deny(DenyReason::InsufficientRole));
        let none = BTreeSet::new();
        let me = UserFacts { id: Some(employee.user_id), role: Role::Employee, business_id: Some(BIZ), property_access: &none };
        assert!(authorize(&employee, &Action::ReadUser, &Target::User(me)).is_allowed());
        let colleague = facts(Role::Employee, Some(BIZ), &none);
        assert_eq!(authorize(&employee, &Action::ReadUser, &Target::User(colleague)), deny(DenyReason::InsufficientRole));
    }

    #[test]
    fn join_respects_existing_tenant() {
        let target = Target::Property { business_id: BIZ, property_id: Some(Uuid::new_v4()) };
        assert!(authorize(&actor(Role::Employee, None, &[]), &Action::JoinProperty, &target).is_allowed());
        assert!(authorize(&actor(Role::Employee, Some(BIZ), &[]), &Action::JoinProperty, &target).is_allowed());
        assert_eq!(
            authorize(&actor(Role::Manager, Some(OTHER), &[]), &Action::JoinProperty, &target),
            deny(DenyReason::CrossTenantAccess)
        );
    }

    #[test]
    fn join_cannot_widen_an_existing_scope() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let sibling = Target::Property { business_id: BIZ, property_id: Some(p2) };
        for role in [Role::Manager, Role::Employee] {
            let scoped = actor(role, Some(BIZ), &[p1]);
            assert_eq!(authorize(&scoped, &Action::JoinProperty, &sibling), deny(DenyReason::PropertyOutOfScope));
            // re-joining what is already granted is harmless
            let own = Target::Property { business_id: BIZ, property_id: Some(p1) };
            assert!(authorize(&scoped, &Action::JoinProperty, &own).is_allowed());
        }
    }
}
