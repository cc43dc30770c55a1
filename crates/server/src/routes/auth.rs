use axum::extract::State;
use serde::{Deserialize, Serialize};

use service::auth::{AccessToken, TokenPair};
use service::domain::User;

use crate::auth::CurrentActor;
use crate::errors::{ok, ApiJson, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginOutput {
    pub user: User,
    pub tokens: TokenPair,
}

#[derive(Debug, Deserialize)]
pub struct RefreshInput {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutOutput {
    pub session_version: u32,
}

pub async fn login(State(state): State<AppState>, ApiJson(input): ApiJson<LoginInput>) -> ApiResult<LoginOutput> {
    let (user, tokens) = state.credentials.login(&input.email, &input.password).await?;
    ok(LoginOutput { user, tokens })
}

pub async fn refresh(State(state): State<AppState>, ApiJson(input): ApiJson<RefreshInput>) -> ApiResult<AccessToken> {
    ok(state.credentials.refresh(&input.refresh_token).await?)
}

/// Revokes every refresh token of the caller and drops its sync session.
/// Access tokens already handed out stay valid until they expire.
pub async fn logout(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<LogoutOutput> {
    let session_version = state.credentials.revoke(actor.user_id).await?;
    state.sync.detach(actor.user_id).await?;
    ok(LogoutOutput { session_version })
}

pub async fn me(State(state): State<AppState>, CurrentActor(actor): CurrentActor) -> ApiResult<User> {
    ok(state.hierarchy.get_user(&actor, actor.user_id).await?)
}
