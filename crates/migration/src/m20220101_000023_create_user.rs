//! Create `app_user` table with optional FK to `business`.
//!
//! `session_version` is the refresh revocation marker.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AppUser::Table)
                    .if_not_exists()
                    .col(uuid(AppUser::Id).primary_key())
                    .col(string_len(AppUser::Email, 255).unique_key().not_null())
                    .col(string_len(AppUser::Name, 128).not_null())
                    .col(string_len(AppUser::Role, 32).not_null())
                    .col(ColumnDef::new(AppUser::BusinessId).string_len(32).null())
                    .col(boolean(AppUser::IsActive).not_null())
                    .col(integer(AppUser::SessionVersion).not_null())
                    .col(
                        ColumnDef::new(AppUser::LastAuthenticatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(timestamp_with_time_zone(AppUser::CreatedAt).not_null())
                    .col(timestamp_with_time_zone(AppUser::UpdatedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_app_user_business")
                            .from(AppUser::Table, AppUser::BusinessId)
                            .to(Business::Table, Business::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(AppUser::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum AppUser { Table, Id, Email, Name, Role, BusinessId, IsActive, SessionVersion, LastAuthenticatedAt, CreatedAt, UpdatedAt }

#[derive(DeriveIden)]
enum Business { Table, Id }
