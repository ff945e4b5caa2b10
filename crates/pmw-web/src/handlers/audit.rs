//! Audit Trail Handler

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::Json,
};
use pmw_core::{AuditEntry, Error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct AuditResponse {
    pub entries: Vec<AuditEntry>,
    pub total: usize,
}

/// GET /api/audit?limit=N - newest first
pub async fn audit_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> Result<Json<AuditResponse>, ApiError> {
    let Query(query) = query.map_err(|e| Error::bad_request(e.body_text()))?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);

    Ok(Json(AuditResponse {
        entries: state.audit.recent(limit).await,
        total: state.audit.len().await,
    }))
}
