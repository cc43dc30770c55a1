use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Property: index on business_id (listing properties of a business)
        manager
            .create_index(
                Index::create()
                    .name("idx_property_business")
                    .table(Property::Table)
                    .col(Property::BusinessId)
                    .col(Property::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // AppUser: index on business_id
        manager
            .create_index(
                Index::create()
                    .name("idx_app_user_business")
                    .table(AppUser::Table)
                    .col(AppUser::BusinessId)
                    .to_owned(),
            )
            .await?;

        // PropertyAccess: reverse lookup by property (delete cascade)
        manager
            .create_index(
                Index::create()
                    .name("idx_property_access_property")
                    .table(PropertyAccess::Table)
                    .col(PropertyAccess::PropertyId)
                    .to_owned(),
            )
            .await?;

        // At most one main property per business
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS uniq_property_main_per_business \
                 ON property (business_id) WHERE is_main",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS uniq_property_main_per_business")
            .await?;
        manager.drop_index(Index::drop().name("idx_property_access_property").to_owned()).await?;
        manager.drop_index(Index::drop().name("idx_app_user_business").to_owned()).await?;
        manager.drop_index(Index::drop().name("idx_property_business").to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Property { Table, BusinessId, CreatedAt }

#[derive(DeriveIden)]
enum AppUser { Table, BusinessId }

#[derive(DeriveIden)]
enum PropertyAccess { Table, PropertyId }
