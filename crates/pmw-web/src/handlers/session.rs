//! Session Handler

use axum::{extract::State, http::HeaderMap, response::Json, Extension};
use pmw_core::{AuditEntry, Principal};
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::{extract_bearer_token, ClientIp};
use crate::state::AppState;

#[derive(Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
    pub message: String,
}

/// DELETE /api/session - end the session behind the presented token
///
/// The configured admin token is not a session and stays valid.
pub async fn revoke_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    headers: HeaderMap,
) -> Result<Json<RevokeResponse>, ApiError> {
    let revoked = match extract_bearer_token(&headers) {
        Some(token) => state.verifier.revoke(&token).await?,
        None => false,
    };

    if revoked {
        let entry = AuditEntry::new(&principal.name, "SESSION_REVOKE", &principal.name, &client_ip);
        state.audit.record(entry).await;
    }

    let message = if revoked {
        format!("Session for '{}' revoked", principal.name)
    } else {
        "Token is not a revocable session".to_string()
    };
    Ok(Json(RevokeResponse { revoked, message }))
}
