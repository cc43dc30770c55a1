use axum::extract::{Path, State};

use service::domain::{Business, BusinessPatch, NewBusiness, NewProperty, Property, User};

use crate::auth::CurrentActor;
use crate::errors::{ok, ApiJson, ApiResult};
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ApiJson(input): ApiJson<NewBusiness>,
) -> ApiResult<Business> {
    ok(state.hierarchy.create_business(&actor, input).await?)
}

pub async fn list(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<Vec<Business>> {
    ok(state.hierarchy.list_businesses(&actor).await?)
}

pub async fn get(State(state): State<AppState>, CurrentActor(actor): CurrentActor, Path(id): Path<String>) -> ApiResult<Business> {
    ok(state.hierarchy.get_business(&actor, &id).await?)
}

pub async fn update(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<BusinessPatch>,
) -> ApiResult<Business> {
    ok(state.hierarchy.update_business(&actor, &id, patch).await?)
}

pub async fn delete(State(state): State<AppState>, CurrentActor(actor): CurrentActor, Path(id): Path<String>) -> ApiResult<()> {
    state.hierarchy.delete_business(&actor, &id).await?;
    ok(())
}

pub async fn list_properties(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Vec<Property>> {
    ok(state.hierarchy.list_properties(&actor, &id).await?)
}

pub async fn create_property(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<NewProperty>,
) -> ApiResult<Property> {
    ok(state.hierarchy.create_property(&actor, &id, input).await?)
}

pub async fn list_users(State(state): State<AppState>, CurrentActor(actor): CurrentActor, Path(id): Path<String>) -> ApiResult<Vec<User>> {
    ok(state.hierarchy.list_users(&actor, &id).await?)
}
