use axum::extract::{Path, State};
use serde::Deserialize;
use uuid::Uuid;

use service::domain::{NewUser, Role, User, UserPatch};

use crate::auth::CurrentActor;
use crate::errors::{ok, ApiJson, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RoleInput {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct BusinessInput {
    pub business_id: String,
}

pub async fn create(State(state): State<AppState>, CurrentActor(actor): CurrentActor, ApiJson(input): ApiJson<NewUser>) -> ApiResult<User> {
    ok(state.hierarchy.create_user(&actor, input).await?)
}

pub async fn get(State(state): State<AppState>, CurrentActor(actor): CurrentActor, Path(id): Path<Uuid>) -> ApiResult<User> {
    ok(state.hierarchy.get_user(&actor, id).await?)
}

pub async fn update(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    ApiJson(patch): ApiJson<UserPatch>,
) -> ApiResult<User> {
    ok(state.hierarchy.update_user(&actor, id, patch).await?)
}

pub async fn delete(State(state): State<AppState>, CurrentActor(actor): CurrentActor, Path(id): Path<Uuid>) -> ApiResult<()> {
    state.hierarchy.delete_user(&actor, id).await?;
    ok(())
}

pub async fn change_role(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    ApiJson(input): ApiJson<RoleInput>,
) -> ApiResult<User> {
    ok(state.hierarchy.change_role(&actor, id, input.role).await?)
}

pub async fn assign_business(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    ApiJson(input): ApiJson<BusinessInput>,
) -> ApiResult<User> {
    ok(state.hierarchy.assign_user_to_business(&actor, id, &input.business_id).await?)
}

pub async fn grant_property(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path((id, property_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<User> {
    ok(state.hierarchy.grant_property_access(&actor, id, property_id).await?)
}

pub async fn revoke_property(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path((id, property_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<User> {
    ok(state.hierarchy.revoke_property_access(&actor, id, property_id).await?)
}
