//! Bearer token authentication and source IP restriction
//!
//! Applied to every authenticated route. Order of checks: peer address
//! against the allow-list (403), presence of a bearer token (401), then the
//! token verifier (401 when invalid, 503 when the verifier cannot answer). A
//! rejected request never reaches its handler.
//!
//! The allow-list sees the connection's peer address. `X-Forwarded-For` and
//! `X-Real-IP` replace it only when the peer is a configured trusted proxy;
//! otherwise they are recorded in audit entries but never trusted.

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use pmw_core::{Error, IpAllowList, Verification};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Client address resolved by the auth middleware, for audit entries
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// Token from `Authorization: Bearer <token>`
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Token from `?access_token=` on a WebSocket upgrade
///
/// Browsers cannot set headers on WebSocket handshakes. Plain requests
/// never authenticate this way.
pub fn extract_upgrade_token(request: &Request) -> Option<String> {
    let upgrade = request.headers().get(header::UPGRADE)?.to_str().ok()?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return None;
    }
    Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()?
        .0
        .access_token
        .filter(|token| !token.is_empty())
}

/// Client address claimed by forwarding headers
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    // X-Forwarded-For: first hop is the client
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    // X-Real-IP (nginx convention)
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Best-effort client address for audit entries
pub fn extract_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    forwarded_ip(headers)
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "0.0.0.0".to_string())
}

/// Address the allow-list is checked against
///
/// The peer itself, or the forwarded client when the peer is a trusted
/// proxy. `None` when the peer is unknown.
pub fn source_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxies: &IpAllowList,
) -> Option<IpAddr> {
    let peer = peer?;
    if trusted_proxies.contains(peer) {
        if let Some(client) = forwarded_ip(headers).and_then(|ip| ip.parse().ok()) {
            return Some(client);
        }
    }
    Some(peer)
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let client_ip = extract_ip(request.headers(), peer);
    let source = source_ip(request.headers(), peer, &state.trusted_proxies);

    if !state.allow_list.permits(source) {
        let shown = source.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
        warn!("Rejected request from {}: not in allow-list", shown);
        return ApiError(Error::Forbidden(format!("address {} is not allowed", shown)))
            .into_response();
    }

    let token =
        extract_bearer_token(request.headers()).or_else(|| extract_upgrade_token(&request));
    let Some(token) = token else {
        debug!("Missing bearer token from {}", client_ip);
        return ApiError(Error::Unauthorized("missing bearer token".to_string())).into_response();
    };

    match state.verifier.verify(&token).await {
        Ok(Verification::Valid(principal)) => {
            debug!("Authenticated {} ({}) from {}", principal.name, principal.role, client_ip);
            request.extensions_mut().insert(principal.clone());
            request.extensions_mut().insert(ClientIp(client_ip));
            let mut response = next.run(request).await;
            // Picked up by the access log
            response.extensions_mut().insert(principal);
            response
        }
        Ok(Verification::Invalid) => {
            warn!("Invalid token from {}", client_ip);
            ApiError(Error::Unauthorized("invalid token".to_string())).into_response()
        }
        Err(e) => {
            warn!("Token verifier unavailable: {}", e);
            ApiError(Error::AuthUnavailable(e.to_string())).into_response()
        }
    }
}
