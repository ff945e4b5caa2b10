//! Metric samples and reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Last occurrence of a custom event
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub payload: Value,
    pub at: DateTime<Utc>,
}

/// Read-only view of one plugin's metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricSample {
    pub invocations: u64,
    pub errors: u64,
    /// Seconds since the plugin was last enabled; 0 when not running
    pub uptime_secs: u64,
    pub last_latency_ms: Option<f64>,
    pub counters: BTreeMap<String, i64>,
    pub gauges: BTreeMap<String, Value>,
    pub events: BTreeMap<String, EventRecord>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A report submitted by a plugin execution path
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricReport {
    Invocation {
        latency_ms: f64,
        #[serde(default = "default_success")]
        success: bool,
    },
    Counter {
        key: String,
        #[serde(default = "default_delta")]
        delta: i64,
    },
    Gauge {
        key: String,
        value: Value,
    },
    Event {
        event_type: String,
        #[serde(default)]
        payload: Value,
    },
}

fn default_success() -> bool {
    true
}

fn default_delta() -> i64 {
    1
}

/// Mutable per-plugin state, always accessed under one lock
#[derive(Debug, Default)]
pub(crate) struct PluginMetrics {
    invocations: u64,
    errors: u64,
    last_latency_ms: Option<f64>,
    counters: BTreeMap<String, i64>,
    gauges: BTreeMap<String, Value>,
    events: BTreeMap<String, EventRecord>,
    enabled_since: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
}

impl PluginMetrics {
    pub(crate) fn record_invocation(&mut self, latency: Duration, success: bool) {
        self.invocations += 1;
        if !success {
            self.errors += 1;
        }
        self.last_latency_ms = Some(latency.as_secs_f64() * 1000.0);
        self.touch();
    }

    pub(crate) fn increment_counter(&mut self, key: &str, delta: i64) -> i64 {
        let value = self.counters.entry(key.to_string()).or_insert(0);
        *value = value.saturating_add(delta);
        let value = *value;
        self.touch();
        value
    }

    pub(crate) fn set_gauge(&mut self, key: &str, value: Value) {
        self.gauges.insert(key.to_string(), value);
        self.touch();
    }

    pub(crate) fn record_event(&mut self, event_type: &str, payload: Value) {
        self.increment_counter(&format!("event_{}_count", event_type), 1);
        self.events.insert(
            event_type.to_string(),
            EventRecord {
                payload,
                at: Utc::now(),
            },
        );
    }

    pub(crate) fn mark_enabled(&mut self) {
        self.enabled_since = Some(Instant::now());
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.enabled_since = None;
    }

    /// Reset reported values; the running/stopped edge is kept
    pub(crate) fn clear(&mut self) {
        let enabled_since = self.enabled_since;
        *self = PluginMetrics {
            enabled_since,
            ..Default::default()
        };
    }

    pub(crate) fn snapshot(&self) -> MetricSample {
        MetricSample {
            invocations: self.invocations,
            errors: self.errors,
            uptime_secs: self
                .enabled_since
                .map(|since| since.elapsed().as_secs())
                .unwrap_or(0),
            last_latency_ms: self.last_latency_ms,
            counters: self.counters.clone(),
            gauges: self.gauges.clone(),
            events: self.events.clone(),
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}
