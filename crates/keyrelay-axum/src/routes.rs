//! Route definitions and router construction.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::bearer_guard;
use crate::handlers::{channel_types, scripts};
use crate::state::{AppState, AxumContext};

/// All admin API routes, without state applied.
///
/// Static segments (`validate`, `test`, `reload-all`, `active`) coexist with
/// the `{id}` parameter; static matches take priority.
pub(crate) fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/scripts", get(scripts::list).post(scripts::create))
        .route("/scripts/validate", post(scripts::validate))
        .route("/scripts/test", post(scripts::test))
        .route("/scripts/reload-all", post(scripts::reload_all))
        .route("/scripts/active", get(scripts::active))
        .route(
            "/scripts/{id}",
            get(scripts::get)
                .put(scripts::update)
                .delete(scripts::remove),
        )
        .route("/scripts/{id}/enable", post(scripts::enable))
        .route("/scripts/{id}/disable", post(scripts::disable))
        .route("/scripts/{id}/logs", get(scripts::logs))
        .route("/scripts/{id}/reload", post(scripts::reload))
        .route("/channel-types", get(channel_types::list))
        .route(
            "/channel-types-with-metadata",
            get(channel_types::list_with_metadata),
        )
}

/// Create the admin router.
///
/// `/health` stays unauthenticated; everything else requires the bearer
/// token when one is configured.
pub fn create_router(ctx: AxumContext, auth_token: Option<&str>) -> Router {
    let state: AppState = Arc::new(ctx);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut api = api_routes();
    if let Some(token) = auth_token {
        api = bearer_guard(api, token);
    }

    Router::new()
        .route("/health", get(health_check))
        .merge(api.layer(cors))
        .with_state(state)
}

pub(crate) async fn health_check() -> &'static str {
    "OK"
}
