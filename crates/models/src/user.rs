use sea_orm::{entity::prelude::*, ConnectionTrait};
use serde::{Deserialize, Serialize};

use crate::business;
use crate::errors;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "app_user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub email: String,
    pub name: String,
    /// Role label, see `service::domain::Role`.
    pub role: String,
    pub business_id: Option<String>,
    pub is_active: bool,
    /// Bumped on revocation; refresh tokens carrying an older value are rejected.
    pub session_version: i32,
    pub last_authenticated_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    Business,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::Business => Entity::belongs_to(business::Entity)
                .from(Column::BusinessId)
                .to(business::Column::Id)
                .into(),
        }
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub fn validate_email(email: &str) -> Result<(), errors::ModelError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(()),
        _ => Err(errors::ModelError::Validation("invalid email".into())),
    }
}

pub fn validate_name(name: &str) -> Result<(), errors::ModelError> {
    if name.trim().is_empty() { return Err(errors::ModelError::Validation("name required".into())); }
    Ok(())
}

pub async fn find_by_email<C: ConnectionTrait>(db: &C, email: &str) -> Result<Option<Model>, errors::ModelError> {
    Ok(Entity::find().filter(Column::Email.eq(email.trim().to_lowercase())).one(db).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(validate_email("owner@test.co").is_ok());
        assert!(validate_email("owner@localhost").is_err());
        assert!(validate_email("@test.co").is_err());
        assert!(validate_email("nobody").is_err());
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("Ana").is_ok());
        assert!(validate_name("   ").is_err());
    }
}
