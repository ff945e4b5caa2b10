//! Metrics API Handlers

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
    Extension,
};
use pmw_core::{AuditEntry, Error, LifecycleState, Principal};
use pmw_metrics::{MetricReport, MetricSample, MetricsOverview};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::ClientIp;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PluginMetricsResponse {
    pub plugin: String,
    pub state: LifecycleState,
    pub metrics: MetricSample,
}

#[derive(Serialize)]
pub struct ClearMetricsResponse {
    pub plugin: String,
    pub cleared: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct OverviewResponse {
    #[serde(flatten)]
    pub overview: MetricsOverview,
    pub plugin_counts: BTreeMap<String, usize>,
}

/// GET /api/plugins/:name/metrics
pub async fn get_metrics_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<PluginMetricsResponse>, ApiError> {
    let plugin_state = state.registry.state_of(&name).await?;
    let metrics = state.metrics.for_plugin(&name).await?;
    Ok(Json(PluginMetricsResponse {
        plugin: name,
        state: plugin_state,
        metrics,
    }))
}

/// POST /api/plugins/:name/metrics - apply one report, return the updated sample
pub async fn report_metrics_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Result<Json<MetricReport>, JsonRejection>,
) -> Result<Json<MetricSample>, ApiError> {
    state.registry.state_of(&name).await?;
    let Json(report) = body.map_err(|e| Error::bad_request(e.body_text()))?;
    Ok(Json(state.metrics.report(&name, report).await?))
}

/// DELETE /api/plugins/:name/metrics
pub async fn clear_metrics_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Extension(principal): Extension<Principal>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
) -> Result<Json<ClearMetricsResponse>, ApiError> {
    state.registry.state_of(&name).await?;
    state.metrics.clear(&name).await?;
    state
        .audit
        .record(
            AuditEntry::new(&principal.name, "METRICS_CLEAR", &name, &client_ip)
                .metadata(json!({ "plugin": name })),
        )
        .await;

    Ok(Json(ClearMetricsResponse {
        message: format!("Metrics cleared for plugin '{}'", name),
        plugin: name,
        cleared: true,
    }))
}

/// GET /api/metrics/overview
pub async fn overview_handler(State(state): State<Arc<AppState>>) -> Json<OverviewResponse> {
    Json(OverviewResponse {
        overview: state.metrics.overview().await,
        plugin_counts: state.registry.count_by_state().await,
    })
}
