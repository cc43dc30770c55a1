use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use service::domain::{JoinTarget, Property, PropertyPatch, User};

use crate::auth::CurrentActor;
use crate::errors::{ok, ApiJson, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DeletedProperty {
    pub property: Property,
    pub affected_users: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct JoinInput {
    pub code: String,
}

pub async fn get(State(state): State<AppState>, CurrentActor(actor): CurrentActor, Path(id): Path<Uuid>) -> ApiResult<Property> {
    ok(state.hierarchy.get_property(&actor, id).await?)
}

pub async fn update(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    ApiJson(patch): ApiJson<PropertyPatch>,
) -> ApiResult<Property> {
    ok(state.hierarchy.update_property(&actor, id, patch).await?)
}

pub async fn delete(State(state): State<AppState>, CurrentActor(actor): CurrentActor, Path(id): Path<Uuid>) -> ApiResult<DeletedProperty> {
    let removal = state.hierarchy.delete_property(&actor, id).await?;
    ok(DeletedProperty { property: removal.property, affected_users: removal.affected_users })
}

pub async fn set_main(State(state): State<AppState>, CurrentActor(actor): CurrentActor, Path(id): Path<Uuid>) -> ApiResult<Property> {
    ok(state.hierarchy.set_main_property(&actor, id).await?)
}

/// Public: lets a device show what it is about to join before signing in.
pub async fn resolve_join(State(state): State<AppState>, Path(code): Path<String>) -> ApiResult<JoinTarget> {
    ok(state.hierarchy.resolve_join_code(&code).await?)
}

pub async fn join(State(state): State<AppState>, CurrentActor(actor): CurrentActor, ApiJson(input): ApiJson<JoinInput>) -> ApiResult<User> {
    ok(state.hierarchy.join_property(&actor, &input.code).await?)
}
