use sea_orm::{entity::prelude::*, ConnectionTrait, Set};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors;
use crate::property;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "business")]
pub struct Model {
    /// Business code, immutable once assigned.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub business_type: String,
    pub owner_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    Property,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self { Relation::Property => Entity::has_many(property::Entity).into() }
    }
}

impl Related<property::Entity> for Entity {
    fn to() -> RelationDef { Relation::Property.def() }
}

impl ActiveModelBehavior for ActiveModel {}

pub fn validate_name(name: &str) -> Result<(), errors::ModelError> {
    let trimmed = name.trim();
    if trimmed.is_empty() { return Err(errors::ModelError::Validation("name required".into())); }
    if trimmed.chars().count() > 128 { return Err(errors::ModelError::Validation("name too long (<=128)".into())); }
    Ok(())
}

/// Insert a business row; a duplicate primary key surfaces as `ModelError::Conflict`.
pub async fn insert<C: ConnectionTrait>(db: &C, model: Model) -> Result<Model, errors::ModelError> {
    validate_name(&model.name)?;
    let am = ActiveModel {
        id: Set(model.id),
        name: Set(model.name),
        email: Set(model.email),
        phone: Set(model.phone),
        address: Set(model.address),
        business_type: Set(model.business_type),
        owner_id: Set(model.owner_id),
        is_active: Set(model.is_active),
        created_at: Set(model.created_at),
        updated_at: Set(Utc::now().into()),
    };
    Ok(am.insert(db).await?)
}
