//! pmw-plugins: plugin catalog and lifecycle management
//!
//! Features:
//! - Registry of installed plugins with declared configuration schemas
//! - Lifecycle transition table (enable / disable / reload)
//! - Per-plugin action dispatch with reject-on-conflict semantics
//! - Pluggable executors for the actual start/stop/reload work
//! - Lifecycle event hooks

pub mod dispatcher;
pub mod executor;
pub mod lifecycle;
pub mod plugin;
pub mod registry;
pub mod state;

pub use dispatcher::{ActionDispatcher, DispatchOutcome};
pub use executor::{ActionExecutor, CommandExecutor, NoopExecutor};
pub use lifecycle::Plan;
pub use plugin::{PluginConfigView, PluginDescriptor, PluginDetail, PluginSummary};
pub use registry::{PluginEvent, PluginRegistry};
pub use state::{LifecycleRecord, ValidationError, ValidationResult};
