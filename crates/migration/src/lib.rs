//! Migrator registering entity-specific migrations in dependency order.
//! Indexes are applied last.
pub use sea_orm_migration::prelude::*;

mod m20220101_000021_create_business;
mod m20220101_000022_create_property;
mod m20220101_000023_create_user;
mod m20220101_000024_create_user_credentials;
mod m20220101_000025_create_property_access;
mod m20220101_000026_create_code_reservation;
mod m20220101_000002_add_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20220101_000021_create_business::Migration),
            Box::new(m20220101_000022_create_property::Migration),
            Box::new(m20220101_000023_create_user::Migration),
            Box::new(m20220101_000024_create_user_credentials::Migration),
            Box::new(m20220101_000025_create_property_access::Migration),
            Box::new(m20220101_000026_create_code_reservation::Migration),
            // Indexes should always be applied last
            Box::new(m20220101_000002_add_indexes::Migration),
        ]
    }
}
