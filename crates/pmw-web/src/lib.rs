//! pmw-web: HTTP API gateway
//!
//! Exposes the plugin registry, the action dispatcher, metrics and the audit
//! trail as a JSON API, plus a WebSocket stream of plugin events. Every
//! route except `GET /api/health` requires a bearer token.

pub mod error;
pub mod events;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::ApiError;
pub use events::{EventHub, StreamEvent};
pub use router::create_router;
pub use state::{AppState, GatewayOptions};
