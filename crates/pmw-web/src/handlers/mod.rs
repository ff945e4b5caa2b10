//! HTTP Handlers

pub mod audit;
pub mod events;
pub mod health;
pub mod metrics;
pub mod plugins;
pub mod server;
pub mod session;

pub use audit::audit_handler;
pub use events::events_handler;
pub use health::health_handler;
pub use metrics::{
    clear_metrics_handler, get_metrics_handler, overview_handler, report_metrics_handler,
};
pub use plugins::{
    get_plugin_config_handler, get_plugin_handler, list_plugins_handler, plugin_action_handler,
};
pub use server::server_info_handler;
pub use session::revoke_session_handler;
