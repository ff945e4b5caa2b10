//! Server Information Handler

use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub hostname: String,
    pub pid: u32,
    pub os: String,
    pub arch: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub plugin_count: usize,
    pub plugins_by_state: BTreeMap<String, usize>,
    pub active_sessions: usize,
    pub event_subscribers: usize,
}

/// GET /api/server
pub async fn server_info_handler(State(state): State<Arc<AppState>>) -> Json<ServerInfo> {
    Json(ServerInfo {
        name: "pluginmanager-web".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        hostname: gethostname::gethostname().to_string_lossy().to_string(),
        pid: std::process::id(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        started_at: state.started_at,
        uptime_secs: state.uptime_secs(),
        plugin_count: state.registry.count().await,
        plugins_by_state: state.registry.count_by_state().await,
        active_sessions: state.verifier.active_sessions().await,
        event_subscribers: state.events.subscribers(),
    })
}
