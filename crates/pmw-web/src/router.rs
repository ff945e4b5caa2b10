//! Router configuration for pmw-web

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::middleware::require_auth;
use crate::state::AppState;

/// Create the API router
///
/// Only `/api/health` is reachable without a bearer token. `/ws/events`
/// also accepts the token as `?access_token=` on the upgrade request.
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        // Server
        .route("/api/server", get(handlers::server_info_handler))
        .route("/api/audit", get(handlers::audit_handler))
        .route("/api/session", delete(handlers::revoke_session_handler))
        // Plugins
        .route("/api/plugins", get(handlers::list_plugins_handler))
        .route("/api/plugins/:name", get(handlers::get_plugin_handler))
        .route("/api/plugins/:name/config", get(handlers::get_plugin_config_handler))
        .route("/api/plugins/:name/action", post(handlers::plugin_action_handler))
        // Metrics
        .route(
            "/api/plugins/:name/metrics",
            get(handlers::get_metrics_handler)
                .post(handlers::report_metrics_handler)
                .delete(handlers::clear_metrics_handler),
        )
        .route("/api/metrics/overview", get(handlers::overview_handler))
        // Events
        .route("/ws/events", get(handlers::events_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/api/health", get(handlers::health_handler))
        .merge(protected)
        .with_state(state)
}
