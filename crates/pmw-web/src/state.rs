//! Application State

use chrono::{DateTime, Utc};
use pmw_core::{AuditLog, IpAllowList, TokenVerifier};
use pmw_metrics::MetricsAggregator;
use pmw_plugins::{ActionDispatcher, PluginRegistry};
use std::sync::Arc;
use std::time::Instant;

use crate::events::EventHub;

/// Network-facing options of the gateway
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Peer addresses allowed on authenticated routes (empty = all)
    pub allow_list: IpAllowList,
    /// Peers whose forwarding headers name the real client
    pub trusted_proxies: IpAllowList,
    /// Backlog per event stream subscriber
    pub event_buffer: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            allow_list: IpAllowList::default(),
            trusted_proxies: IpAllowList::default(),
            event_buffer: 256,
        }
    }
}

/// Application state shared across all handlers
pub struct AppState {
    pub dispatcher: ActionDispatcher,
    pub registry: PluginRegistry,
    pub metrics: Arc<MetricsAggregator>,
    /// Decides whether a bearer token is valid
    pub verifier: Arc<dyn TokenVerifier>,
    pub allow_list: IpAllowList,
    pub trusted_proxies: IpAllowList,
    pub audit: Arc<AuditLog>,
    pub events: EventHub,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build the state and start forwarding registry events to `/ws/events`
    pub async fn new(
        dispatcher: ActionDispatcher,
        verifier: Arc<dyn TokenVerifier>,
        audit: Arc<AuditLog>,
        options: GatewayOptions,
    ) -> Self {
        let events = EventHub::new(options.event_buffer);
        events.attach(dispatcher.registry()).await;

        Self {
            registry: dispatcher.registry().clone(),
            metrics: Arc::clone(dispatcher.metrics()),
            dispatcher,
            verifier,
            allow_list: options.allow_list,
            trusted_proxies: options.trusted_proxies,
            audit,
            events,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
