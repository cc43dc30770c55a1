//! Create `code_reservation` table.
//!
//! Inserting a row is the uniqueness gate for generated codes: the primary key
//! `(scope, code)` makes "create if absent" atomic. Rows are retired, never deleted.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CodeReservation::Table)
                    .if_not_exists()
                    .col(string_len(CodeReservation::Scope, 16).not_null())
                    .col(string_len(CodeReservation::Code, 32).not_null())
                    .col(timestamp_with_time_zone(CodeReservation::CreatedAt).not_null())
                    .col(
                        ColumnDef::new(CodeReservation::RetiredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(CodeReservation::Scope)
                            .col(CodeReservation::Code),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(CodeReservation::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum CodeReservation { Table, Scope, Code, CreatedAt, RetiredAt }
