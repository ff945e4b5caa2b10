//! Common types used across pluginmanager-web

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Operational status of a plugin
///
/// Exactly one state is active per plugin. `Starting`, `Stopping` and
/// `Reloading` are transient: a transition is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LifecycleState {
    #[serde(alias = "stopped")]
    Stopped,
    #[serde(alias = "starting")]
    Starting,
    #[serde(alias = "enabled")]
    Enabled,
    #[serde(alias = "stopping")]
    Stopping,
    #[serde(alias = "disabled")]
    Disabled,
    #[serde(alias = "reloading")]
    Reloading,
    #[serde(alias = "failed")]
    Failed,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 7] = [
        LifecycleState::Stopped,
        LifecycleState::Starting,
        LifecycleState::Enabled,
        LifecycleState::Stopping,
        LifecycleState::Disabled,
        LifecycleState::Reloading,
        LifecycleState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "Stopped",
            LifecycleState::Starting => "Starting",
            LifecycleState::Enabled => "Enabled",
            LifecycleState::Stopping => "Stopping",
            LifecycleState::Disabled => "Disabled",
            LifecycleState::Reloading => "Reloading",
            LifecycleState::Failed => "Failed",
        }
    }

    /// A transition is currently in flight
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LifecycleState::Starting | LifecycleState::Stopping | LifecycleState::Reloading
        )
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, LifecycleState::Enabled)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle action requested by an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginAction {
    Enable,
    Disable,
    Reload,
}

impl PluginAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginAction::Enable => "enable",
            PluginAction::Disable => "disable",
            PluginAction::Reload => "reload",
        }
    }

    /// Name used for audit entries, e.g. `PLUGIN_RELOAD`
    pub fn audit_name(&self) -> &'static str {
        match self {
            PluginAction::Enable => "PLUGIN_ENABLE",
            PluginAction::Disable => "PLUGIN_DISABLE",
            PluginAction::Reload => "PLUGIN_RELOAD",
        }
    }
}

impl std::fmt::Display for PluginAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enable" => Ok(PluginAction::Enable),
            "disable" => Ok(PluginAction::Disable),
            "reload" => Ok(PluginAction::Reload),
            _ => Err(Error::invalid_action(s)),
        }
    }
}

/// A lifecycle action on its way to the dispatcher
#[derive(Debug, Clone, Serialize)]
pub struct ActionRequest {
    pub plugin: String,
    pub action: PluginAction,
    pub submitted_at: DateTime<Utc>,
    /// Principal that asked for the action, if authenticated
    pub requested_by: Option<String>,
}

impl ActionRequest {
    pub fn new(plugin: impl Into<String>, action: PluginAction) -> Self {
        Self {
            plugin: plugin.into(),
            action,
            submitted_at: Utc::now(),
            requested_by: None,
        }
    }

    pub fn requested_by(mut self, principal: impl Into<String>) -> Self {
        self.requested_by = Some(principal.into());
        self
    }
}
