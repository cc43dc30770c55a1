use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use service::auth::{AuthError, Claims};
use service::authz::Actor;

use crate::errors::ApiError;
use crate::state::AppState;

fn bearer_token(req: &Request) -> Result<&str, AuthError> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AuthError::TokenInvalid("missing Authorization header".into()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::TokenInvalid("expected Bearer token".into()))
}

/// 校验 Authorization: Bearer <access token>，通过后把 Claims 注入请求扩展
pub async fn require_bearer(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let claims = match bearer_token(&req).and_then(|t| state.credentials.verify(t)) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(path = %req.uri().path(), code = e.code(), "bearer token rejected");
            return Err(e.into());
        }
    };
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// The caller resolved from its token against the current user record, so
/// role changes and deactivation apply without waiting for token expiry.
pub struct CurrentActor(pub Actor);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = parts
            .extensions
            .get::<Claims>()
            .cloned()
            .ok_or_else(|| AuthError::TokenInvalid("route is not behind the bearer layer".into()))?;
        Ok(CurrentActor(state.hierarchy.actor_for(&claims).await?))
    }
}
