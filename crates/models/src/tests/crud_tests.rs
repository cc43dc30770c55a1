use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

use super::{setup_test_db, unique_code};
use crate::{business, property, property_access, user, user_credentials};

fn business_model(id: &str) -> business::Model {
    let now = Utc::now().into();
    business::Model {
        id: id.to_string(),
        name: "Crud Test Co".into(),
        email: None,
        phone: None,
        address: None,
        business_type: "restaurant".into(),
        owner_id: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Test business CRUD operations
#[tokio::test]
async fn test_business_crud() -> Result<()> {
    let Some(db) = setup_test_db().await? else { return Ok(()) };

    let id = unique_code("CRUD");
    let created = business::insert(&db, business_model(&id)).await?;
    assert_eq!(created.id, id);

    let found = business::Entity::find_by_id(id.clone()).one(&db).await?;
    assert_eq!(found.map(|b| b.name), Some("Crud Test Co".to_string()));

    // duplicate code is rejected by the primary key
    let dup = business::insert(&db, business_model(&id)).await;
    assert!(matches!(dup, Err(crate::errors::ModelError::Conflict(_))));

    business::Entity::delete_by_id(id.clone()).exec(&db).await?;
    assert!(business::Entity::find_by_id(id).one(&db).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_business_name_validation() -> Result<()> {
    let Some(db) = setup_test_db().await? else { return Ok(()) };
    let mut model = business_model(&unique_code("CRUD"));
    model.name = "   ".into();
    assert!(matches!(business::insert(&db, model).await, Err(crate::errors::ModelError::Validation(_))));
    Ok(())
}

/// Properties, users, grants and credentials wired together
#[tokio::test]
async fn test_property_user_access_crud() -> Result<()> {
    let Some(db) = setup_test_db().await? else { return Ok(()) };
    let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();

    let b = business::insert(&db, business_model(&unique_code("CRUD"))).await?;
    let p = property::ActiveModel {
        id: Set(Uuid::new_v4()),
        business_id: Set(b.id.clone()),
        name: Set("Main".into()),
        address: Set(None),
        is_main: Set(true),
        connection_code: Set(unique_code("K")),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&db)
    .await?;

    assert_eq!(property::list_by_business(&db, &b.id).await?.len(), 1);
    assert_eq!(property::find_by_code(&db, &p.connection_code).await?.map(|r| r.id), Some(p.id));

    let u = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(format!("crud_{}@example.com", Uuid::new_v4().simple())),
        name: Set("Crud User".into()),
        role: Set("employee".into()),
        business_id: Set(Some(b.id.clone())),
        is_active: Set(true),
        session_version: Set(0),
        last_authenticated_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&db)
    .await?;
    assert_eq!(user::find_by_email(&db, &u.email.to_uppercase()).await?.map(|r| r.id), Some(u.id));

    property_access::ActiveModel { user_id: Set(u.id), property_id: Set(p.id), created_at: Set(now) }
        .insert(&db)
        .await?;
    assert_eq!(property_access::property_ids_for_user(&db, u.id).await?, vec![p.id]);
    assert_eq!(property_access::user_ids_for_property(&db, p.id).await?, vec![u.id]);

    user_credentials::upsert_password(&db, u.id, "hash-1".into(), "argon2").await?;
    user_credentials::upsert_password(&db, u.id, "hash-2".into(), "argon2").await?;
    assert_eq!(user_credentials::find_by_user(&db, u.id).await?.map(|c| c.password_hash), Some("hash-2".into()));

    // deleting the user cascades to grants and credentials
    user::Entity::delete_by_id(u.id).exec(&db).await?;
    assert!(property_access::property_ids_for_user(&db, u.id).await?.is_empty());
    assert!(user_credentials::find_by_user(&db, u.id).await?.is_none());

    property::Entity::delete_by_id(p.id).exec(&db).await?;
    business::Entity::delete_by_id(b.id).exec(&db).await?;
    Ok(())
}
