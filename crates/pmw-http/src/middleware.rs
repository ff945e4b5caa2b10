//! Shared Middleware Stack
//!
//! Applied once to the composed router. From the outside in: CORS, the
//! request span, compression, the request timeout, the access log and the
//! security headers.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header::HeaderName, HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
    Router,
};
use pmw_core::Principal;
use std::time::{Duration, Instant};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Toggles taken from `web.*` in the service configuration
#[derive(Debug, Clone)]
pub struct MiddlewareConfig {
    pub cors: bool,
    pub compression: bool,
    /// Requests running longer are answered with 408
    pub timeout: Duration,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            cors: true,
            compression: true,
            timeout: Duration::from_secs(60),
        }
    }
}

impl MiddlewareConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cors(mut self, enabled: bool) -> Self {
        self.cors = enabled;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }
}

/// Wrap `router` in the middleware stack described by `config`
pub fn apply_middleware(router: Router, config: &MiddlewareConfig) -> Router {
    let mut router = router
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(access_log_middleware))
        .layer(TimeoutLayer::new(config.timeout));

    if config.compression {
        router = router.layer(CompressionLayer::new());
    }

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        let label = RouteLabel::of(request);
        tracing::info_span!(
            "request",
            method = %request.method(),
            route = %label.route,
            plugin = label.plugin.as_deref().unwrap_or("-"),
        )
    });
    router = router.layer(trace);

    if config.cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Route template and target plugin of a request
///
/// Uses the matched route rather than the raw URI so query strings never
/// reach the logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteLabel {
    pub route: String,
    pub plugin: Option<String>,
}

impl RouteLabel {
    pub fn of<B>(request: &Request<B>) -> Self {
        let path = request.uri().path();
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_string())
            .unwrap_or_else(|| path.to_string());

        let plugin = if route.starts_with("/api/plugins/:name") {
            path.trim_start_matches("/api/plugins/")
                .split('/')
                .next()
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        } else {
            None
        };

        Self { route, plugin }
    }
}

const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("cache-control", "no-store"),
];

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }

    response
}

/// One line per request: route, plugin, principal, status, latency
///
/// The principal is read from the response, where the auth layer leaves it
/// for authenticated requests.
async fn access_log_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let label = RouteLabel::of(&request);

    let response = next.run(request).await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    let principal = response
        .extensions()
        .get::<Principal>()
        .map(|p| p.name.as_str())
        .unwrap_or("-");
    let plugin = label.plugin.as_deref().unwrap_or("-");

    if response.status().is_server_error() {
        tracing::error!(
            %method, route = %label.route, plugin, principal, status, elapsed_ms,
            "request failed"
        );
    } else if response.status().is_client_error() {
        tracing::warn!(
            %method, route = %label.route, plugin, principal, status, elapsed_ms,
            "request rejected"
        );
    } else {
        tracing::info!(
            %method, route = %label.route, plugin, principal, status, elapsed_ms,
            "request served"
        );
    }

    response
}
