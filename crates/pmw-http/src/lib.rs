//! pmw-http: HTTP server for pluginmanager-web
//!
//! The gateway crate builds an axum `Router`; this crate wraps it in the
//! shared middleware stack and serves it.
//!
//! ```text
//! pmw-service binary
//!     └── pmw-http (this crate)
//!         ├── Middleware stack (CORS, span, compression, timeout, access log)
//!         ├── pmw_web::create_router()
//!         └── Graceful shutdown (Ctrl-C / SIGTERM)
//! ```

pub mod middleware;
pub mod server;

pub use middleware::{apply_middleware, MiddlewareConfig, RouteLabel};
pub use server::{shutdown_signal, HttpServer, HttpServerBuilder, ServerConfig};

/// Error types for the HTTP server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server binding error: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Invalid bind address: {0}")]
    AddressError(String),

    #[error("Router configuration error: {0}")]
    RouterError(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
