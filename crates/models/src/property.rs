use sea_orm::{entity::prelude::*, ConnectionTrait, QueryOrder};
use serde::{Deserialize, Serialize};

use crate::business;
use crate::errors;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "property")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub business_id: String,
    pub name: String,
    pub address: Option<String>,
    pub is_main: bool,
    #[sea_orm(unique)]
    pub connection_code: String,
    pub is_active: bool,
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

impl Related<business::Entity> for Entity {
    fn to() -> RelationDef { Relation::Business.def() }
}

impl ActiveModelBehavior for ActiveModel {}

pub fn validate_name(name: &str) -> Result<(), errors::ModelError> {
    if name.trim().is_empty() { return Err(errors::ModelError::Validation("property name required".into())); }
    Ok(())
}

/// Properties of a business ordered by creation.
pub async fn list_by_business<C: ConnectionTrait>(db: &C, business_id: &str) -> Result<Vec<Model>, errors::ModelError> {
    let rows = Entity::find()
        .filter(Column::BusinessId.eq(business_id.to_string()))
        .order_by_asc(Column::CreatedAt)
        .order_by_asc(Column::Id)
        .all(db)
        .await?;
    Ok(rows)
}

pub async fn find_by_code<C: ConnectionTrait>(db: &C, code: &str) -> Result<Option<Model>, errors::ModelError> {
    Ok(Entity::find().filter(Column::ConnectionCode.eq(code.to_string())).one(db).await?)
}
