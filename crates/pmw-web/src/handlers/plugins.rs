//! Plugin API Handlers

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
    Extension,
};
use pmw_core::{ActionRequest, AuditEntry, Error, LifecycleState, PluginAction, Principal};
use pmw_plugins::{PluginConfigView, PluginDetail, PluginSummary};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::middleware::ClientIp;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PluginListResponse {
    pub plugins: Vec<PluginSummary>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct ActionBody {
    pub action: String,
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub plugin: String,
    pub action: PluginAction,
    pub previous_state: LifecycleState,
    pub state: LifecycleState,
    pub changed: bool,
    pub duration_ms: u64,
    pub message: String,
}

/// GET /api/plugins - all plugins ordered by name
pub async fn list_plugins_handler(State(state): State<Arc<AppState>>) -> Json<PluginListResponse> {
    let plugins = state.registry.list().await;
    Json(PluginListResponse {
        total: plugins.len(),
        plugins,
    })
}

/// GET /api/plugins/:name
pub async fn get_plugin_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<PluginDetail>, ApiError> {
    Ok(Json(state.registry.get(&name).await?))
}

/// GET /api/plugins/:name/config
pub async fn get_plugin_config_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<PluginConfigView>, ApiError> {
    Ok(Json(state.registry.get_config(&name).await?))
}

/// POST /api/plugins/:name/action - body `{"action": "enable" | "disable" | "reload"}`
///
/// The body is parsed before the plugin is looked up, so a bad action is a
/// 400 even for an unknown plugin.
pub async fn plugin_action_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Extension(principal): Extension<Principal>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    body: Result<Json<ActionBody>, JsonRejection>,
) -> Result<Json<ActionResponse>, ApiError> {
    let action: PluginAction = match body {
        Ok(Json(body)) => body.action.parse()?,
        Err(rejection) => return Err(Error::invalid_action(rejection.body_text()).into()),
    };

    let request = ActionRequest::new(&name, action).requested_by(&principal.name);
    let result = state.dispatcher.dispatch(request).await;

    if !matches!(result, Err(Error::NotFound(_))) {
        let metadata = match &result {
            Ok(outcome) => json!({
                "previous_state": outcome.previous_state,
                "state": outcome.state,
                "changed": outcome.changed,
                "duration_ms": outcome.duration_ms,
            }),
            Err(e) => json!({ "error": e.code(), "message": e.to_string() }),
        };
        state
            .audit
            .record(
                AuditEntry::new(&principal.name, action.audit_name(), &name, &client_ip)
                    .success(result.is_ok())
                    .metadata(metadata),
            )
            .await;
    }

    let outcome = result?;
    let message = if outcome.changed {
        format!("Plugin '{}' is now {}", outcome.plugin, outcome.state)
    } else {
        format!("Plugin '{}' is already {}", outcome.plugin, outcome.state)
    };
    info!("{} by {}: {}", action.audit_name(), principal.name, message);

    Ok(Json(ActionResponse {
        plugin: outcome.plugin,
        action: outcome.action,
        previous_state: outcome.previous_state,
        state: outcome.state,
        changed: outcome.changed,
        duration_ms: outcome.duration_ms,
        message,
    }))
}
