//! Error types for pluginmanager-web

use thiserror::Error;

use crate::types::{LifecycleState, PluginAction};

/// Main error type for plugin management operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Token verifier unavailable: {0}")]
    AuthUnavailable(String),

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Plugin '{plugin}' already has a transition in flight ({state})")]
    Conflict {
        plugin: String,
        state: LifecycleState,
    },

    #[error("Cannot {action} plugin '{plugin}' while it is {state}")]
    InvalidTransition {
        plugin: String,
        action: PluginAction,
        state: LifecycleState,
    },

    #[error("Transition of plugin '{plugin}' failed: {reason}")]
    TransitionFailed { plugin: String, reason: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a not found error
    pub fn not_found(name: impl Into<String>) -> Self {
        Error::NotFound(name.into())
    }

    /// Create an invalid action error
    pub fn invalid_action(action: impl Into<String>) -> Self {
        Error::InvalidAction(action.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Stable machine-readable code, used as the `error` field on the wire
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::AuthUnavailable(_) => "auth_unavailable",
            Error::NotFound(_) => "not_found",
            Error::InvalidAction(_) => "invalid_action",
            Error::Conflict { .. } => "conflict",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::TransitionFailed { .. } => "transition_failed",
            Error::BadRequest(_) => "bad_request",
            Error::Config(_) => "config_error",
            Error::Io(_) | Error::Serialization(_) | Error::Yaml(_) | Error::Internal(_) => {
                "internal_error"
            }
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(Error::not_found("x").code(), "not_found");
        assert_eq!(Error::invalid_action("bogus").code(), "invalid_action");
        assert_eq!(
            Error::Conflict {
                plugin: "p".into(),
                state: LifecycleState::Starting
            }
            .code(),
            "conflict"
        );
        assert_eq!(Error::internal("boom").code(), "internal_error");
    }
}
