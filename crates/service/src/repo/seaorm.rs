use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use models::errors::ModelError;
use models::{business, code_reservation, property, property_access, user, user_credentials};

use crate::codes::CodeScope;
use crate::domain::{normalize_email, Business, BusinessPatch, Property, PropertyPatch, Role, User, UserPatch};
use crate::repository::{PropertyRemoval, StoreError, TenantRepository};

const PASSWORD_ALGORITHM: &str = "argon2";

impl From<ModelError> for StoreError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Conflict(msg) => StoreError::Conflict(msg),
            ModelError::Unavailable(msg) => StoreError::Unavailable(msg),
            ModelError::Validation(msg) | ModelError::Db(msg) => StoreError::Backend(msg),
        }
    }
}

impl From<DbErr> for StoreError {
    fn from(e: DbErr) -> Self { ModelError::from(e).into() }
}

// Postgres keeps microseconds; stamps handed back must compare equal to a re-read.
fn now() -> DateTimeWithTimeZone { Utc::now().trunc_subsecs(6).fixed_offset() }

fn business_from(row: business::Model, property_ids: Vec<Uuid>) -> Business {
    Business {
        id: row.id,
        name: row.name,
        email: row.email,
        phone: row.phone,
        address: row.address,
        business_type: row.business_type,
        property_ids,
        owner_id: row.owner_id,
        is_active: row.is_active,
        created_at: row.created_at.with_timezone(&Utc),
        updated_at: row.updated_at.with_timezone(&Utc),
    }
}

fn property_from(row: property::Model) -> Property {
    Property {
        id: row.id,
        business_id: row.business_id,
        name: row.name,
        address: row.address,
        is_main: row.is_main,
        connection_code: row.connection_code,
        is_active: row.is_active,
        created_at: row.created_at.with_timezone(&Utc),
        updated_at: row.updated_at.with_timezone(&Utc),
    }
}

fn user_from(row: user::Model, access: Vec<Uuid>) -> Result<User, StoreError> {
    let role: Role = row.role.parse().map_err(|_| StoreError::Backend(format!("user {} has unknown role {:?}", row.id, row.role)))?;
    Ok(User {
        id: row.id,
        email: row.email,
        name: row.name,
        role,
        business_id: row.business_id,
        property_access: access.into_iter().collect(),
        is_active: row.is_active,
        session_version: row.session_version.max(0) as u32,
        last_authenticated_at: row.last_authenticated_at.map(|t| t.with_timezone(&Utc)),
        created_at: row.created_at.with_timezone(&Utc),
        updated_at: row.updated_at.with_timezone(&Utc),
    })
}

async fn load_business<C: ConnectionTrait>(c: &C, row: business::Model) -> Result<Business, StoreError> {
    let ids = property::list_by_business(c, &row.id).await?.into_iter().map(|p| p.id).collect();
    Ok(business_from(row, ids))
}

async fn load_user<C: ConnectionTrait>(c: &C, row: user::Model) -> Result<User, StoreError> {
    let access = property_access::property_ids_for_user(c, row.id).await?;
    user_from(row, access)
}

async fn require_business<C: ConnectionTrait>(c: &C, id: &str) -> Result<business::Model, StoreError> {
    business::Entity::find_by_id(id.to_string())
        .one(c)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("business {id}")))
}

async fn require_property<C: ConnectionTrait>(c: &C, id: Uuid) -> Result<property::Model, StoreError> {
    property::Entity::find_by_id(id)
        .one(c)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("property {id}")))
}

async fn require_user<C: ConnectionTrait>(c: &C, id: Uuid) -> Result<user::Model, StoreError> {
    user::Entity::find_by_id(id)
        .one(c)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
}

/// Row lock on the business; serialises property creation and main-property
/// changes within one business.
async fn lock_business<C: ConnectionTrait>(c: &C, id: &str) -> Result<business::Model, StoreError> {
    business::Entity::find_by_id(id.to_string())
        .lock_exclusive()
        .one(c)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("business {id}")))
}

/// Row lock on the user. Always taken after the business lock so that
/// membership and grant changes cannot interleave with property removal.
async fn lock_user<C: ConnectionTrait>(c: &C, id: Uuid) -> Result<user::Model, StoreError> {
    user::Entity::find_by_id(id)
        .lock_exclusive()
        .one(c)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
}

async fn touch_business<C: ConnectionTrait>(c: &C, id: &str, stamp: DateTimeWithTimeZone) -> Result<(), StoreError> {
    business::Entity::update_many()
        .col_expr(business::Column::UpdatedAt, Expr::value(stamp))
        .filter(business::Column::Id.eq(id.to_string()))
        .exec(c)
        .await?;
    Ok(())
}

async fn touch_users<C: ConnectionTrait>(c: &C, ids: &[Uuid], stamp: DateTimeWithTimeZone) -> Result<(), StoreError> {
    if ids.is_empty() {
        return Ok(());
    }
    user::Entity::update_many()
        .col_expr(user::Column::UpdatedAt, Expr::value(stamp))
        .filter(user::Column::Id.is_in(ids.to_vec()))
        .exec(c)
        .await?;
    Ok(())
}

async fn retire<C: ConnectionTrait>(c: &C, scope: CodeScope, code: &str) -> Result<(), StoreError> {
    let stamp = now();
    let row = code_reservation::ActiveModel {
        scope: Set(scope.as_str().to_string()),
        code: Set(code.to_string()),
        created_at: Set(stamp),
        retired_at: Set(Some(stamp)),
    };
    code_reservation::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([code_reservation::Column::Scope, code_reservation::Column::Code])
                .update_column(code_reservation::Column::RetiredAt)
                .to_owned(),
        )
        .exec_without_returning(c)
        .await?;
    Ok(())
}

/// PostgreSQL tenant store. Multi-row mutations run in one transaction.
#[derive(Clone)]
pub struct SeaOrmTenantRepository {
    pub db: DatabaseConnection,
}

impl SeaOrmTenantRepository {
    pub fn new(db: DatabaseConnection) -> Self { Self { db } }
}

#[async_trait]
impl TenantRepository for SeaOrmTenantRepository {
    async fn reserve_code(&self, scope: CodeScope, code: &str) -> Result<bool, StoreError> {
        let row = code_reservation::ActiveModel {
            scope: Set(scope.as_str().to_string()),
            code: Set(code.to_string()),
            created_at: Set(now()),
            retired_at: Set(None),
        };
        let res = code_reservation::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([code_reservation::Column::Scope, code_reservation::Column::Code])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await;
        match res {
            Ok(inserted) => Ok(inserted == 1),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn retire_code(&self, scope: CodeScope, code: &str) -> Result<(), StoreError> {
        retire(&self.db, scope, code).await
    }

    async fn insert_business(&self, business: Business, owner_link: Option<Uuid>) -> Result<Business, StoreError> {
        let txn = self.db.begin().await?;
        if business::Entity::find_by_id(business.id.clone()).one(&txn).await?.is_some() {
            return Err(StoreError::Conflict(format!("business {} already exists", business.id)));
        }
        if let Some(owner) = owner_link {
            let row = user::Entity::find_by_id(owner)
                .lock_exclusive()
                .one(&txn)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("user {owner}")))?;
            if row.business_id.is_some() {
                return Err(StoreError::Conflict(format!("user {owner} already belongs to a business")));
            }
        }

        let stamp = now();
        let row = business::insert(
            &txn,
            business::Model {
                id: business.id,
                name: business.name,
                email: business.email,
                phone: business.phone,
                address: business.address,
                business_type: business.business_type,
                owner_id: business.owner_id,
                is_active: business.is_active,
                created_at: stamp,
                updated_at: stamp,
            },
        )
        .await?;

        if let Some(owner) = owner_link {
            property_access::Entity::delete_many()
                .filter(property_access::Column::UserId.eq(owner))
                .exec(&txn)
                .await?;
            user::Entity::update_many()
                .col_expr(user::Column::BusinessId, Expr::value(row.id.clone()))
                .col_expr(user::Column::UpdatedAt, Expr::value(stamp))
                .filter(user::Column::Id.eq(owner))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;
        Ok(business_from(row, Vec::new()))
    }

    async fn get_business(&self, id: &str) -> Result<Option<Business>, StoreError> {
        match business::Entity::find_by_id(id.to_string()).one(&self.db).await? {
            Some(row) => Ok(Some(load_business(&self.db, row).await?)),
            None => Ok(None),
        }
    }

    async fn list_businesses(&self) -> Result<Vec<Business>, StoreError> {
        let rows = business::Entity::find()
            .order_by_asc(business::Column::CreatedAt)
            .all(&self.db)
            .await?;
        let mut owned: HashMap<String, Vec<Uuid>> = HashMap::new();
        let properties = property::Entity::find()
            .order_by_asc(property::Column::CreatedAt)
            .order_by_asc(property::Column::Id)
            .all(&self.db)
            .await?;
        for p in properties {
            owned.entry(p.business_id).or_default().push(p.id);
        }
        Ok(rows
            .into_iter()
            .map(|row| {
                let ids = owned.remove(&row.id).unwrap_or_default();
                business_from(row, ids)
            })
            .collect())
    }

    async fn update_business(&self, id: &str, patch: &BusinessPatch) -> Result<Business, StoreError> {
        let mut am: business::ActiveModel = require_business(&self.db, id).await?.into();
        if let Some(v) = &patch.name { am.name = Set(v.clone()); }
        if let Some(v) = &patch.email { am.email = Set(Some(v.clone())); }
        if let Some(v) = &patch.phone { am.phone = Set(Some(v.clone())); }
        if let Some(v) = &patch.address { am.address = Set(Some(v.clone())); }
        if let Some(v) = &patch.business_type { am.business_type = Set(v.clone()); }
        if let Some(v) = patch.is_active { am.is_active = Set(v); }
        am.updated_at = Set(now());
        let row = am.update(&self.db).await?;
        load_business(&self.db, row).await
    }

    async fn delete_business(&self, id: &str) -> Result<(), StoreError> {
        let txn = self.db.begin().await?;
        lock_business(&txn, id).await?;
        let owned = property::Entity::find()
            .filter(property::Column::BusinessId.eq(id.to_string()))
            .count(&txn)
            .await?;
        if owned > 0 {
            return Err(StoreError::Conflict(format!("business {id} still owns properties")));
        }
        user::Entity::update_many()
            .col_expr(user::Column::BusinessId, Expr::value(Option::<String>::None))
            .col_expr(user::Column::UpdatedAt, Expr::value(now()))
            .filter(user::Column::BusinessId.eq(id.to_string()))
            .exec(&txn)
            .await?;
        business::Entity::delete_by_id(id.to_string()).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn create_property(&self, property: Property) -> Result<Property, StoreError> {
        let txn = self.db.begin().await?;
        lock_business(&txn, &property.business_id).await?;
        if property::find_by_code(&txn, &property.connection_code).await?.is_some() {
            return Err(StoreError::Conflict(format!("connection code {} in use", property.connection_code)));
        }
        let siblings = property::Entity::find()
            .filter(property::Column::BusinessId.eq(property.business_id.clone()))
            .count(&txn)
            .await?;

        let stamp = now();
        let row = property::ActiveModel {
            id: Set(property.id),
            business_id: Set(property.business_id.clone()),
            name: Set(property.name),
            address: Set(property.address),
            is_main: Set(siblings == 0),
            connection_code: Set(property.connection_code),
            is_active: Set(property.is_active),
            created_at: Set(stamp),
            updated_at: Set(stamp),
        }
        .insert(&txn)
        .await?;
        touch_business(&txn, &property.business_id, stamp).await?;
        txn.commit().await?;
        Ok(property_from(row))
    }

    async fn get_property(&self, id: Uuid) -> Result<Option<Property>, StoreError> {
        Ok(property::Entity::find_by_id(id).one(&self.db).await?.map(property_from))
    }

    async fn find_property_by_code(&self, code: &str) -> Result<Option<Property>, StoreError> {
        Ok(property::find_by_code(&self.db, code).await?.map(property_from))
    }

    async fn list_properties(&self, business_id: &str) -> Result<Vec<Property>, StoreError> {
        require_business(&self.db, business_id).await?;
        Ok(property::list_by_business(&self.db, business_id).await?.into_iter().map(property_from).collect())
    }

    async fn update_property(&self, id: Uuid, patch: &PropertyPatch) -> Result<Property, StoreError> {
        let mut am: property::ActiveModel = require_property(&self.db, id).await?.into();
        if let Some(v) = &patch.name { am.name = Set(v.clone()); }
        if let Some(v) = &patch.address { am.address = Set(Some(v.clone())); }
        if let Some(v) = patch.is_active { am.is_active = Set(v); }
        am.updated_at = Set(now());
        Ok(property_from(am.update(&self.db).await?))
    }

    async fn set_main_property(&self, id: Uuid) -> Result<Property, StoreError> {
        let txn = self.db.begin().await?;
        let target = require_property(&txn, id).await?;
        lock_business(&txn, &target.business_id).await?;
        let stamp = now();
        // 先降级旧的主门店，部分唯一索引要求同一时刻只有一个 is_main
        property::Entity::update_many()
            .col_expr(property::Column::IsMain, Expr::value(false))
            .col_expr(property::Column::UpdatedAt, Expr::value(stamp))
            .filter(property::Column::BusinessId.eq(target.business_id.clone()))
            .filter(property::Column::IsMain.eq(true))
            .filter(property::Column::Id.ne(id))
            .exec(&txn)
            .await?;
        if !target.is_main {
            property::Entity::update_many()
                .col_expr(property::Column::IsMain, Expr::value(true))
                .col_expr(property::Column::UpdatedAt, Expr::value(stamp))
                .filter(property::Column::Id.eq(id))
                .exec(&txn)
                .await?;
        }
        let promoted = require_property(&txn, id).await?;
        txn.commit().await?;
        Ok(property_from(promoted))
    }

    async fn delete_property(&self, id: Uuid) -> Result<PropertyRemoval, StoreError> {
        let txn = self.db.begin().await?;
        let business_id = require_property(&txn, id).await?.business_id;
        lock_business(&txn, &business_id).await?;
        // 加锁后重读，is_main 可能已被并发的 set_main_property 改变
        let row = require_property(&txn, id).await?;
        if row.is_main {
            return Err(StoreError::Conflict("cannot delete the main property; promote another first".into()));
        }

        let stamp = now();
        let mut affected_users = property_access::user_ids_for_property(&txn, id).await?;
        affected_users.sort();
        property_access::Entity::delete_many()
            .filter(property_access::Column::PropertyId.eq(id))
            .exec(&txn)
            .await?;
        touch_users(&txn, &affected_users, stamp).await?;
        property::Entity::delete_by_id(id).exec(&txn).await?;
        touch_business(&txn, &row.business_id, stamp).await?;
        retire(&txn, CodeScope::Connection, &row.connection_code).await?;
        txn.commit().await?;

        Ok(PropertyRemoval { property: property_from(row), affected_users })
    }

    async fn insert_user(&self, user: User, password_hash: String) -> Result<User, StoreError> {
        let email = normalize_email(&user.email);
        let txn = self.db.begin().await?;
        if user::find_by_email(&txn, &email).await?.is_some() {
            return Err(StoreError::Conflict(format!("user {email} already exists")));
        }
        if let Some(b) = &user.business_id {
            require_business(&txn, b).await?;
        }
        for pid in &user.property_access {
            let owned = property::Entity::find_by_id(*pid).one(&txn).await?;
            if owned.map(|p| p.business_id) != user.business_id {
                return Err(StoreError::Conflict(format!("property {pid} is not owned by the user's business")));
            }
        }

        let stamp = now();
        let row = user::ActiveModel {
            id: Set(user.id),
            email: Set(email),
            name: Set(user.name),
            role: Set(user.role.as_str().to_string()),
            business_id: Set(user.business_id),
            is_active: Set(user.is_active),
            session_version: Set(user.session_version as i32),
            last_authenticated_at: Set(None),
            created_at: Set(stamp),
            updated_at: Set(stamp),
        }
        .insert(&txn)
        .await?;
        for pid in &user.property_access {
            property_access::ActiveModel {
                user_id: Set(row.id),
                property_id: Set(*pid),
                created_at: Set(stamp),
            }
            .insert(&txn)
            .await?;
        }
        user_credentials::upsert_password(&txn, row.id, password_hash, PASSWORD_ALGORITHM).await?;
        txn.commit().await?;
        user_from(row, user.property_access.into_iter().collect())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        match user::Entity::find_by_id(id).one(&self.db).await? {
            Some(row) => Ok(Some(load_user(&self.db, row).await?)),
            None => Ok(None),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        match user::find_by_email(&self.db, email).await? {
            Some(row) => Ok(Some(load_user(&self.db, row).await?)),
            None => Ok(None),
        }
    }

    async fn get_password_hash(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(user_credentials::find_by_user(&self.db, user_id).await?.map(|c| c.password_hash))
    }

    async fn list_users_by_business(&self, business_id: &str) -> Result<Vec<User>, StoreError> {
        let rows = user::Entity::find()
            .filter(user::Column::BusinessId.eq(business_id.to_string()))
            .order_by_asc(user::Column::CreatedAt)
            .all(&self.db)
            .await?;
        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(load_user(&self.db, row).await?);
        }
        Ok(users)
    }

    async fn list_users_with_property(&self, property_id: Uuid) -> Result<Vec<User>, StoreError> {
        let ids = property_access::user_ids_for_property(&self.db, property_id).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = user::Entity::find()
            .filter(user::Column::Id.is_in(ids))
            .order_by_asc(user::Column::CreatedAt)
            .all(&self.db)
            .await?;
        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(load_user(&self.db, row).await?);
        }
        Ok(users)
    }

    async fn count_users_with_role(&self, role: Role) -> Result<u64, StoreError> {
        Ok(user::Entity::find()
            .filter(user::Column::Role.eq(role.as_str()))
            .count(&self.db)
            .await?)
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<User, StoreError> {
        let mut am: user::ActiveModel = require_user(&self.db, id).await?.into();
        if let Some(v) = &patch.name { am.name = Set(v.clone()); }
        if let Some(v) = patch.is_active { am.is_active = Set(v); }
        am.updated_at = Set(now());
        let row = am.update(&self.db).await?;
        load_user(&self.db, row).await
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<User, StoreError> {
        let mut am: user::ActiveModel = require_user(&self.db, id).await?.into();
        am.role = Set(role.as_str().to_string());
        am.updated_at = Set(now());
        let row = am.update(&self.db).await?;
        load_user(&self.db, row).await
    }

    async fn assign_user_business(&self, id: Uuid, business_id: Option<String>) -> Result<User, StoreError> {
        let txn = self.db.begin().await?;
        if let Some(b) = &business_id {
            lock_business(&txn, b).await?;
        }
        let row = lock_user(&txn, id).await?;
        if row.business_id != business_id {
            property_access::Entity::delete_many()
                .filter(property_access::Column::UserId.eq(id))
                .exec(&txn)
                .await?;
        }
        let mut am: user::ActiveModel = row.into();
        am.business_id = Set(business_id);
        am.updated_at = Set(now());
        let row = am.update(&txn).await?;
        let moved = load_user(&txn, row).await?;
        txn.commit().await?;
        Ok(moved)
    }

    async fn grant_property_access(&self, user_id: Uuid, property_id: Uuid) -> Result<User, StoreError> {
        let txn = self.db.begin().await?;
        let business_id = require_property(&txn, property_id).await?.business_id;
        lock_business(&txn, &business_id).await?;
        let row = lock_user(&txn, user_id).await?;
        // the property may have been deleted while we waited for the lock
        let target = require_property(&txn, property_id).await?;
        if row.business_id.as_deref() != Some(target.business_id.as_str()) {
            return Err(StoreError::Conflict(format!("property {property_id} is not owned by the user's business")));
        }
        let stamp = now();
        let grant = property_access::ActiveModel {
            user_id: Set(user_id),
            property_id: Set(property_id),
            created_at: Set(stamp),
        };
        let inserted = property_access::Entity::insert(grant)
            .on_conflict(
                OnConflict::columns([property_access::Column::UserId, property_access::Column::PropertyId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await;
        match inserted {
            Ok(0) | Err(DbErr::RecordNotInserted) => {}
            Ok(_) => touch_users(&txn, &[user_id], stamp).await?,
            Err(e) => return Err(e.into()),
        }
        let granted = load_user(&txn, require_user(&txn, user_id).await?).await?;
        txn.commit().await?;
        Ok(granted)
    }

    async fn revoke_property_access(&self, user_id: Uuid, property_id: Uuid) -> Result<User, StoreError> {
        let txn = self.db.begin().await?;
        require_user(&txn, user_id).await?;
        let res = property_access::Entity::delete_many()
            .filter(property_access::Column::UserId.eq(user_id))
            .filter(property_access::Column::PropertyId.eq(property_id))
            .exec(&txn)
            .await?;
        if res.rows_affected > 0 {
            touch_users(&txn, &[user_id], now()).await?;
        }
        let revoked = load_user(&txn, require_user(&txn, user_id).await?).await?;
        txn.commit().await?;
        Ok(revoked)
    }

    async fn bump_session_version(&self, id: Uuid) -> Result<u32, StoreError> {
        let txn = self.db.begin().await?;
        let res = user::Entity::update_many()
            .col_expr(user::Column::SessionVersion, Expr::col(user::Column::SessionVersion).add(1))
            .col_expr(user::Column::UpdatedAt, Expr::value(now()))
            .filter(user::Column::Id.eq(id))
            .exec(&txn)
            .await?;
        if res.rows_affected == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        let row = require_user(&txn, id).await?;
        txn.commit().await?;
        Ok(row.session_version.max(0) as u32)
    }

    async fn touch_last_authenticated(&self, id: Uuid) -> Result<(), StoreError> {
        let res = user::Entity::update_many()
            .col_expr(user::Column::LastAuthenticatedAt, Expr::value(now()))
            .filter(user::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        if res.rows_affected == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let res = user::Entity::delete_by_id(id).exec(&self.db).await?;
        if res.rows_affected == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_BUSINESS_TYPE;
    use migration::MigratorTrait;

    /// Connect and migrate, or `None` when no database is reachable.
    async fn setup() -> Option<SeaOrmTenantRepository> {
        if std::env::var("SKIP_DB_TESTS").is_ok() {
            return None;
        }
        let db = match models::db::connect().await {
            Ok(db) => db,
            Err(e) => {
                eprintln!("database unreachable, skipping: {e}");
                return None;
            }
        };
        migration::Migrator::up(&db, None).await.ok()?;
        Some(SeaOrmTenantRepository::new(db))
    }

    fn unique(prefix: &str, len: usize) -> String {
        let tail = Uuid::new_v4().simple().to_string().to_uppercase();
        format!("{prefix}{}", &tail[..len])
    }

    fn business(id: &str) -> Business {
        let ts = Utc::now();
        Business {
            id: id.to_string(),
            name: "Db Test Co".into(),
            email: None,
            phone: None,
            address: None,
            business_type: DEFAULT_BUSINESS_TYPE.into(),
            property_ids: vec![],
            owner_id: None,
            is_active: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn property(business_id: &str) -> Property {
        let ts = Utc::now();
        Property {
            id: Uuid::new_v4(),
            business_id: business_id.to_string(),
            name: "Branch".into(),
            address: None,
            is_main: true,
            connection_code: unique("C", 10),
            is_active: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[tokio::test]
    async fn code_reservation_is_create_if_absent() -> anyhow::Result<()> {
        let Some(repo) = setup().await else { return Ok(()) };
        let code = unique("R", 8);
        assert!(repo.reserve_code(CodeScope::Connection, &code).await?);
        assert!(!repo.reserve_code(CodeScope::Connection, &code).await?);
        repo.retire_code(CodeScope::Connection, &code).await?;
        assert!(!repo.reserve_code(CodeScope::Connection, &code).await?);
        Ok(())
    }

    #[tokio::test]
    async fn main_property_moves_atomically() -> anyhow::Result<()> {
        let Some(repo) = setup().await else { return Ok(()) };
        let b = repo.insert_business(business(&unique("DBT", 6)), None).await?;

        let first = repo.create_property(property(&b.id)).await?;
        let second = repo.create_property(property(&b.id)).await?;
        assert!(first.is_main);
        assert!(!second.is_main, "store decides is_main, not the caller");

        repo.set_main_property(second.id).await?;
        let mains: Vec<_> = repo.list_properties(&b.id).await?.into_iter().filter(|p| p.is_main).collect();
        assert_eq!(mains.len(), 1);
        assert_eq!(mains[0].id, second.id);

        let removal = repo.delete_property(first.id).await?;
        assert_eq!(removal.property.id, first.id);
        assert!(!repo.reserve_code(CodeScope::Connection, &first.connection_code).await?);
        assert_eq!(repo.get_business(&b.id).await?.map(|b| b.property_ids), Some(vec![second.id]));
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_property_strips_grants() -> anyhow::Result<()> {
        let Some(repo) = setup().await else { return Ok(()) };
        let b = repo.insert_business(business(&unique("DBT", 6)), None).await?;
        let main = repo.create_property(property(&b.id)).await?;
        let branch = repo.create_property(property(&b.id)).await?;

        let ts = Utc::now();
        let staff = User {
            id: Uuid::new_v4(),
            email: format!("{}@dbtest.local", unique("u", 8).to_lowercase()),
            name: "Staff".into(),
            role: Role::Employee,
            business_id: Some(b.id.clone()),
            property_access: [main.id, branch.id].into_iter().collect(),
            is_active: true,
            session_version: 0,
            last_authenticated_at: None,
            created_at: ts,
            updated_at: ts,
        };
        let staff = repo.insert_user(staff, "hash".into()).await?;
        assert_eq!(repo.get_password_hash(staff.id).await?.as_deref(), Some("hash"));

        let removal = repo.delete_property(branch.id).await?;
        assert_eq!(removal.affected_users, vec![staff.id]);
        let reloaded = repo.get_user(staff.id).await?.expect("user");
        assert!(!reloaded.property_access.contains(&branch.id));
        assert!(reloaded.property_access.contains(&main.id));

        assert_eq!(repo.bump_session_version(staff.id).await?, 1);
        repo.delete_user(staff.id).await?;
        assert!(repo.get_user(staff.id).await?.is_none());
        Ok(())
    }

    fn staff(business_id: &str, access: &[Uuid]) -> User {
        let ts = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: format!("{}@dbtest.local", unique("u", 8).to_lowercase()),
            name: "Staff".into(),
            role: Role::Employee,
            business_id: Some(business_id.to_string()),
            property_access: access.iter().copied().collect(),
            is_active: true,
            session_version: 0,
            last_authenticated_at: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[tokio::test]
    async fn racing_promote_and_delete_keep_one_main() -> anyhow::Result<()> {
        let Some(repo) = setup().await else { return Ok(()) };
        for _ in 0..5 {
            let b = repo.insert_business(business(&unique("DBT", 6)), None).await?;
            let first = repo.create_property(property(&b.id)).await?;
            let second = repo.create_property(property(&b.id)).await?;

            let (promoted, deleted) = tokio::join!(repo.set_main_property(second.id), repo.delete_property(first.id));
            promoted?;
            match deleted {
                Ok(_) | Err(StoreError::Conflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
            let mains: Vec<_> = repo.list_properties(&b.id).await?.into_iter().filter(|p| p.is_main).collect();
            assert_eq!(mains.len(), 1);
            assert_eq!(mains[0].id, second.id);
        }
        Ok(())
    }

    #[tokio::test]
    async fn racing_grant_and_delete_leave_no_dangling_access() -> anyhow::Result<()> {
        let Some(repo) = setup().await else { return Ok(()) };
        for _ in 0..5 {
            let b = repo.insert_business(business(&unique("DBT", 6)), None).await?;
            let main = repo.create_property(property(&b.id)).await?;
            let branch = repo.create_property(property(&b.id)).await?;
            let user = repo.insert_user(staff(&b.id, &[main.id]), "hash".into()).await?;

            let (granted, removal) =
                tokio::join!(repo.grant_property_access(user.id, branch.id), repo.delete_property(branch.id));
            let removal = removal?;
            match granted {
                Ok(_) => assert_eq!(removal.affected_users, vec![user.id]),
                Err(StoreError::NotFound(_)) => assert!(removal.affected_users.is_empty()),
                Err(e) => return Err(e.into()),
            }
            let reloaded = repo.get_user(user.id).await?.expect("user");
            assert_eq!(reloaded.property_access.into_iter().collect::<Vec<_>>(), vec![main.id]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn racing_grant_and_move_stay_within_one_business() -> anyhow::Result<()> {
        let Some(repo) = setup().await else { return Ok(()) };
        for _ in 0..5 {
            let a = repo.insert_business(business(&unique("DBT", 6)), None).await?;
            let other = repo.insert_business(business(&unique("DBT", 6)), None).await?;
            let home = repo.create_property(property(&a.id)).await?;
            let user = repo.insert_user(staff(&a.id, &[]), "hash".into()).await?;

            let (granted, moved) = tokio::join!(
                repo.grant_property_access(user.id, home.id),
                repo.assign_user_business(user.id, Some(other.id.clone()))
            );
            moved?;
            match granted {
                Ok(_) | Err(StoreError::Conflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
            let reloaded = repo.get_user(user.id).await?.expect("user");
            assert_eq!(reloaded.business_id.as_deref(), Some(other.id.as_str()));
            assert!(reloaded.property_access.is_empty(), "{:?}", reloaded.property_access);
        }
        Ok(())
    }
}
