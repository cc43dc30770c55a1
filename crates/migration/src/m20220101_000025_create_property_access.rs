//! Create `property_access` join table (user ↔ property grants).
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PropertyAccess::Table)
                    .if_not_exists()
                    .col(uuid(PropertyAccess::UserId).not_null())
                    .col(uuid(PropertyAccess::PropertyId).not_null())
                    .col(timestamp_with_time_zone(PropertyAccess::CreatedAt).not_null())
                    .primary_key(
                        Index::create()
                            .col(PropertyAccess::UserId)
                            .col(PropertyAccess::PropertyId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_property_access_user")
                            .from(PropertyAccess::Table, PropertyAccess::UserId)
                            .to(AppUser::Table, AppUser::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_property_access_property")
                            .from(PropertyAccess::Table, PropertyAccess::PropertyId)
                            .to(Property::Table, Property::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(PropertyAccess::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum PropertyAccess { Table, UserId, PropertyId, CreatedAt }

#[derive(DeriveIden)]
enum AppUser { Table, Id }

#[derive(DeriveIden)]
enum Property { Table, Id }
