use sea_orm::{entity::prelude::*, ConnectionTrait};
use serde::{Deserialize, Serialize};

use crate::{property, user};
use crate::errors;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "property_access")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub property_id: Uuid,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    User,
    Property,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::User => Entity::belongs_to(user::Entity)
                .from(Column::UserId)
                .to(user::Column::Id)
                .into(),
            Relation::Property => Entity::belongs_to(property::Entity)
                .from(Column::PropertyId)
                .to(property::Column::Id)
                .into(),
        }
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Property ids granted to a user, oldest grant first.
pub async fn property_ids_for_user<C: ConnectionTrait>(db: &C, user_id: Uuid) -> Result<Vec<Uuid>, errors::ModelError> {
    use sea_orm::QueryOrder;
    let rows = Entity::find()
        .filter(Column::UserId.eq(user_id))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|r| r.property_id).collect())
}

pub async fn user_ids_for_property<C: ConnectionTrait>(db: &C, property_id: Uuid) -> Result<Vec<Uuid>, errors::ModelError> {
    let rows = Entity::find().filter(Column::PropertyId.eq(property_id)).all(db).await?;
    Ok(rows.into_iter().map(|r| r.user_id).collect())
}
