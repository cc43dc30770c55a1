//! Tenant hierarchy entities as seen by the service layer.
//!
//! These are storage-agnostic: the sea-orm rows in `models` and the
//! in-memory repository both convert into them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Closed role set. Declaration order is rank order, so the derived `Ord`
/// gives `Employee < Manager < Owner < SuperAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Manager,
    Owner,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Employee, Role::Manager, Role::Owner, Role::SuperAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Manager => "manager",
            Role::Owner => "owner",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Strictly higher rank than `other`.
    pub fn outranks(self, other: Role) -> bool {
        self > other
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "employee" => Ok(Role::Employee),
            "manager" => Ok(Role::Manager),
            "owner" => Ok(Role::Owner),
            "super_admin" | "superadmin" => Ok(Role::SuperAdmin),
            other => Err(ServiceError::Validation(format!("unknown role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    /// Business code; immutable and globally unique.
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub business_type: String,
    /// Owned properties, oldest first.
    pub property_ids: Vec<Uuid>,
    pub owner_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Maintained by the store on every write.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: Uuid,
    pub business_id: String,
    pub name: String,
    pub address: Option<String>,
    pub is_main: bool,
    pub connection_code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub business_id: Option<String>,
    /// Explicit grants. Owners have implicit access to every property of
    /// their business and need no entries here.
    pub property_access: BTreeSet<Uuid>,
    pub is_active: bool,
    pub session_version: u32,
    pub last_authenticated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_BUSINESS_TYPE: &str = "restaurant";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBusiness {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub business_type: Option<String>,
    /// Only honoured for super-admins; owners always own what they create.
    #[serde(default)]
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub business_type: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl BusinessPatch {
    /// Every editable field of `business`, used to replay a cached copy.
    pub fn from_snapshot(business: &Business) -> Self {
        Self {
            name: Some(business.name.clone()),
            email: business.email.clone(),
            phone: business.phone.clone(),
            address: business.address.clone(),
            business_type: Some(business.business_type.clone()),
            is_active: Some(business.is_active),
        }
    }

    pub fn apply_to(&self, business: &mut Business) {
        if let Some(name) = &self.name { business.name = name.clone(); }
        if let Some(email) = &self.email { business.email = Some(email.clone()); }
        if let Some(phone) = &self.phone { business.phone = Some(phone.clone()); }
        if let Some(address) = &self.address { business.address = Some(address.clone()); }
        if let Some(kind) = &self.business_type { business.business_type = kind.clone(); }
        if let Some(active) = self.is_active { business.is_active = active; }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProperty {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl PropertyPatch {
    pub fn from_snapshot(property: &Property) -> Self {
        Self {
            name: Some(property.name.clone()),
            address: property.address.clone(),
            is_active: Some(property.is_active),
        }
    }

    pub fn apply_to(&self, property: &mut Property) {
        if let Some(name) = &self.name { property.name = name.clone(); }
        if let Some(address) = &self.address { property.address = Some(address.clone()); }
        if let Some(active) = self.is_active { property.is_active = active; }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    /// Defaults to the creating actor's business.
    #[serde(default)]
    pub business_id: Option<String>,
    #[serde(default)]
    pub property_access: BTreeSet<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// What a join code resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinTarget {
    pub property_id: Uuid,
    pub property_name: String,
    pub business_id: String,
    pub business_name: String,
}

/// Human-enterable property code.
///
/// Four digits is the canonical (and only generated) form. Eight-character
/// uppercase alphanumeric codes from older data are still accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinCode {
    Numeric(String),
    Legacy(String),
}

pub const NUMERIC_CODE_LEN: usize = 4;
pub const LEGACY_CODE_LEN: usize = 8;

impl JoinCode {
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() == NUMERIC_CODE_LEN && code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(JoinCode::Numeric(code));
        }
        if code.len() == LEGACY_CODE_LEN
            && code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
            && code.bytes().any(|b| b.is_ascii_uppercase())
        {
            return Ok(JoinCode::Legacy(code));
        }
        Err(ServiceError::Validation(format!("malformed join code: {raw:?}")))
    }

    pub fn as_str(&self) -> &str {
        match self {
            JoinCode::Numeric(c) | JoinCode::Legacy(c) => c,
        }
    }
}

/// Business codes are an uppercase alphabetic prefix plus a numeric suffix, e.g. `TEST4821`.
pub fn validate_business_code(code: &str) -> Result<(), ServiceError> {
    let prefix_len = code.bytes().take_while(|b| b.is_ascii_uppercase()).count();
    let suffix = &code[prefix_len..];
    if (1..=8).contains(&prefix_len) && suffix.len() == 4 && suffix.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ServiceError::Validation(format!("malformed business code: {code:?}")))
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
