pub mod auth;
pub mod businesses;
pub mod properties;
pub mod sync;
pub mod users;

use axum::{
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use common::Health;

use crate::rate_limit::rate_limit;
use crate::state::AppState;

pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// Build the full application router: public routes, bearer-protected
/// routes, and the rate limiter in front of both.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    // Public routes
    let public = Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/join/:code", get(properties::resolve_join));

    // Protected routes
    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/businesses", get(businesses::list).post(businesses::create))
        .route(
            "/businesses/:id",
            get(businesses::get).patch(businesses::update).delete(businesses::delete),
        )
        .route(
            "/businesses/:id/properties",
            get(businesses::list_properties).post(businesses::create_property),
        )
        .route("/businesses/:id/users", get(businesses::list_users))
        .route(
            "/properties/:id",
            get(properties::get).patch(properties::update).delete(properties::delete),
        )
        .route("/properties/:id/main", post(properties::set_main))
        .route("/join", post(properties::join))
        .route("/users", post(users::create))
        .route("/users/:id", get(users::get).patch(users::update).delete(users::delete))
        .route("/users/:id/role", put(users::change_role))
        .route("/users/:id/business", put(users::assign_business))
        .route(
            "/users/:id/properties/:property_id",
            put(users::grant_property).delete(users::revoke_property),
        )
        .route("/sync", get(sync::status).post(sync::sync_now))
        .route("/sync/business/:id", put(sync::select_business))
        .route("/sync/property/:id", put(sync::select_property))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::require_bearer));

    public
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                // 每次请求创建 span，包含方法和路径等，日志级别为 INFO
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                // 响应返回时打点，包含状态码与耗时
                .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                // 失败（5xx 等）时以 ERROR 记录
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
