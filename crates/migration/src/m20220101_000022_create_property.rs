//! Create `property` table with FK to `business`.
//!
//! The connection code is unique system-wide, independent of the owning business.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Property::Table)
                    .if_not_exists()
                    .col(uuid(Property::Id).primary_key())
                    .col(string_len(Property::BusinessId, 32).not_null())
                    .col(string_len(Property::Name, 128).not_null())
                    .col(ColumnDef::new(Property::Address).string_len(255).null())
                    .col(boolean(Property::IsMain).not_null())
                    .col(string_len(Property::ConnectionCode, 16).unique_key().not_null())
                    .col(boolean(Property::IsActive).not_null())
                    .col(timestamp_with_time_zone(Property::CreatedAt).not_null())
                    .col(timestamp_with_time_zone(Property::UpdatedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_property_business")
                            .from(Property::Table, Property::BusinessId)
                            .to(Business::Table, Business::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Property::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Property { Table, Id, BusinessId, Name, Address, IsMain, ConnectionCode, IsActive, CreatedAt, UpdatedAt }

#[derive(DeriveIden)]
enum Business { Table, Id }
