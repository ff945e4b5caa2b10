//! Live plugin events
//!
//! Registry hooks are bridged into a broadcast channel; every `/ws/events`
//! connection holds its own receiver. A subscriber that falls more than the
//! channel capacity behind is told how many events it skipped.

use chrono::{DateTime, Utc};
use pmw_core::{LifecycleState, PluginAction};
use pmw_plugins::{PluginEvent, PluginRegistry};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Message sent to event stream subscribers
///
/// Serialized as `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected {
        message: String,
        timestamp: DateTime<Utc>,
    },
    PluginRegistered {
        plugin: String,
        state: LifecycleState,
        timestamp: DateTime<Utc>,
    },
    PluginStateChange {
        plugin: String,
        action: PluginAction,
        previous_state: LifecycleState,
        state: LifecycleState,
        enabled: bool,
        timestamp: DateTime<Utc>,
    },
    TransitionFailed {
        plugin: String,
        action: PluginAction,
        state: LifecycleState,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Lagged {
        skipped: u64,
    },
}

impl From<&PluginEvent> for StreamEvent {
    fn from(event: &PluginEvent) -> Self {
        let timestamp = Utc::now();
        match event {
            PluginEvent::Registered { name, state } => StreamEvent::PluginRegistered {
                plugin: name.clone(),
                state: *state,
                timestamp,
            },
            PluginEvent::StateChanged {
                plugin,
                action,
                from,
                to,
            } => StreamEvent::PluginStateChange {
                plugin: plugin.clone(),
                action: *action,
                previous_state: *from,
                state: *to,
                enabled: to.is_enabled(),
                timestamp,
            },
            PluginEvent::TransitionFailed {
                plugin,
                action,
                error,
            } => StreamEvent::TransitionFailed {
                plugin: plugin.clone(),
                action: *action,
                state: LifecycleState::Failed,
                error: error.clone(),
                timestamp,
            },
        }
    }
}

/// Fan-out point for plugin events
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventHub {
    /// `capacity` is the per-subscriber backlog
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Forward every event emitted by `registry` to subscribers
    pub async fn attach(&self, registry: &PluginRegistry) {
        let tx = self.tx.clone();
        registry
            .register_hook(Arc::new(move |event: &PluginEvent| {
                // No subscribers is not an error
                let _ = tx.send(StreamEvent::from(event));
            }))
            .await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }
}
