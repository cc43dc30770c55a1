//! Create `business` table.
//!
//! Root tenant; the primary key is the human-memorable business code.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Business::Table)
                    .if_not_exists()
                    .col(string_len(Business::Id, 32).primary_key())
                    .col(string_len(Business::Name, 128).not_null())
                    .col(ColumnDef::new(Business::Email).string_len(255).null())
                    .col(ColumnDef::new(Business::Phone).string_len(64).null())
                    .col(ColumnDef::new(Business::Address).string_len(255).null())
                    .col(string_len(Business::BusinessType, 64).not_null())
                    .col(ColumnDef::new(Business::OwnerId).uuid().null())
                    .col(boolean(Business::IsActive).not_null())
                    .col(timestamp_with_time_zone(Business::CreatedAt).not_null())
                    .col(timestamp_with_time_zone(Business::UpdatedAt).not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Business::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Business { Table, Id, Name, Email, Phone, Address, BusinessType, OwnerId, IsActive, CreatedAt, UpdatedAt }
