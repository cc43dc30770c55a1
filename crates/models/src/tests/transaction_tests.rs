use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use uuid::Uuid;

use super::{setup_test_db, unique_code};
use crate::{business, code_reservation, property};

fn property_model(business_id: &str, is_main: bool) -> property::ActiveModel {
    let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();
    property::ActiveModel {
        id: Set(Uuid::new_v4()),
        business_id: Set(business_id.to_string()),
        name: Set("Tx Property".into()),
        address: Set(None),
        is_main: Set(is_main),
        connection_code: Set(unique_code("T")),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

async fn new_business(db: &sea_orm::DatabaseConnection) -> Result<business::Model> {
    let now = Utc::now().into();
    Ok(business::insert(
        db,
        business::Model {
            id: unique_code("TX"),
            name: "Tx Co".into(),
            email: None,
            phone: None,
            address: None,
            business_type: "restaurant".into(),
            owner_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        },
    )
    .await?)
}

/// Test transaction rollback leaves nothing behind
#[tokio::test]
async fn test_transaction_rollback() -> Result<()> {
    let Some(db) = setup_test_db().await? else { return Ok(()) };
    let b = new_business(&db).await?;

    let txn = db.begin().await?;
    let created = property_model(&b.id, true).insert(&txn).await?;
    txn.rollback().await?;

    assert!(property::Entity::find_by_id(created.id).one(&db).await?.is_none());
    business::Entity::delete_by_id(b.id).exec(&db).await?;
    Ok(())
}

/// The partial unique index allows a single main property per business
#[tokio::test]
async fn test_single_main_property_constraint() -> Result<()> {
    let Some(db) = setup_test_db().await? else { return Ok(()) };
    let b = new_business(&db).await?;

    let main = property_model(&b.id, true).insert(&db).await?;
    let second = property_model(&b.id, true).insert(&db).await;
    assert!(second.is_err(), "second main property must be rejected");
    let branch = property_model(&b.id, false).insert(&db).await?;

    property::Entity::delete_by_id(branch.id).exec(&db).await?;
    property::Entity::delete_by_id(main.id).exec(&db).await?;
    business::Entity::delete_by_id(b.id).exec(&db).await?;
    Ok(())
}

/// A business with properties cannot be removed (FK restrict)
#[tokio::test]
async fn test_business_delete_restricted() -> Result<()> {
    let Some(db) = setup_test_db().await? else { return Ok(()) };
    let b = new_business(&db).await?;
    let p = property_model(&b.id, true).insert(&db).await?;

    assert!(business::Entity::delete_by_id(b.id.clone()).exec(&db).await.is_err());

    property::Entity::delete_by_id(p.id).exec(&db).await?;
    business::Entity::delete_by_id(b.id).exec(&db).await?;
    Ok(())
}

/// `(scope, code)` is the reservation key
#[tokio::test]
async fn test_code_reservation_key() -> Result<()> {
    let Some(db) = setup_test_db().await? else { return Ok(()) };
    let code = unique_code("C");
    let row = |scope: &str| code_reservation::ActiveModel {
        scope: Set(scope.to_string()),
        code: Set(code.clone()),
        created_at: Set(Utc::now().into()),
        retired_at: Set(None),
    };
    row("connection").insert(&db).await?;
    assert!(row("connection").insert(&db).await.is_err());
    // same digits in another scope are independent
    row("business").insert(&db).await?;
    Ok(())
}
