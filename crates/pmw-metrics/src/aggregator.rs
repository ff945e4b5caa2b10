//! Server-wide metrics aggregation

use chrono::{DateTime, Utc};
use pmw_core::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::sample::{MetricReport, MetricSample, PluginMetrics};

const TOP_LIMIT: usize = 5;

/// How a dispatched action ended, for the process-level counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcomeKind {
    /// A transition ran and succeeded
    Succeeded,
    /// Idempotent request, nothing ran
    NoOp,
    /// A transition ran and failed or timed out
    Failed,
    /// Rejected before any state was touched (conflict, invalid transition)
    Rejected,
}

/// Process-level counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessCounters {
    pub uptime_secs: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub actions_dispatched: u64,
    pub actions_succeeded: u64,
    pub actions_noop: u64,
    pub actions_failed: u64,
    pub actions_rejected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewSummary {
    pub total_plugins: usize,
    pub plugins_with_metrics: usize,
    pub total_invocations: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub avg_latency_ms: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedPlugin {
    pub plugin: String,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopPlugins {
    pub by_invocations: Vec<RankedPlugin>,
    pub by_errors: Vec<RankedPlugin>,
}

/// Server-wide aggregate, recomputed on every call
#[derive(Debug, Clone, Serialize)]
pub struct MetricsOverview {
    pub summary: OverviewSummary,
    pub process: ProcessCounters,
    pub top_plugins: TopPlugins,
    pub plugins: BTreeMap<String, MetricSample>,
}

#[derive(Default)]
struct ActionCounters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    noop: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Owns every plugin's metrics and produces the aggregated views
pub struct MetricsAggregator {
    plugins: RwLock<HashMap<String, Arc<RwLock<PluginMetrics>>>>,
    actions: ActionCounters,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            actions: ActionCounters::default(),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Start tracking a plugin. Idempotent.
    pub async fn register(&self, name: &str, enabled: bool) {
        let mut plugins = self.plugins.write().await;
        if plugins.contains_key(name) {
            return;
        }

        let mut metrics = PluginMetrics::default();
        if enabled {
            metrics.mark_enabled();
        }
        plugins.insert(name.to_string(), Arc::new(RwLock::new(metrics)));
        debug!("Tracking metrics for plugin: {}", name);
    }

    async fn entry(&self, name: &str) -> Result<Arc<RwLock<PluginMetrics>>> {
        self.plugins
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(name))
    }

    /// Per-plugin sample view
    pub async fn for_plugin(&self, name: &str) -> Result<MetricSample> {
        let entry = self.entry(name).await?;
        let metrics = entry.read().await;
        Ok(metrics.snapshot())
    }

    pub async fn record_invocation(
        &self,
        name: &str,
        latency: Duration,
        success: bool,
    ) -> Result<()> {
        let entry = self.entry(name).await?;
        entry.write().await.record_invocation(latency, success);
        Ok(())
    }

    /// Returns the counter's new value
    pub async fn increment_counter(&self, name: &str, key: &str, delta: i64) -> Result<i64> {
        let entry = self.entry(name).await?;
        let value = entry.write().await.increment_counter(key, delta);
        Ok(value)
    }

    pub async fn set_gauge(&self, name: &str, key: &str, value: Value) -> Result<()> {
        let entry = self.entry(name).await?;
        entry.write().await.set_gauge(key, value);
        Ok(())
    }

    pub async fn record_event(&self, name: &str, event_type: &str, payload: Value) -> Result<()> {
        let entry = self.entry(name).await?;
        entry.write().await.record_event(event_type, payload);
        debug!("Recorded event {} for plugin {}", event_type, name);
        Ok(())
    }

    /// Apply a report and return the updated sample
    pub async fn report(&self, name: &str, report: MetricReport) -> Result<MetricSample> {
        let entry = self.entry(name).await?;
        let mut metrics = entry.write().await;
        match report {
            MetricReport::Invocation {
                latency_ms,
                success,
            } => {
                if latency_ms < 0.0 {
                    return Err(Error::bad_request("latency_ms must be a non-negative number"));
                }
                let latency = Duration::try_from_secs_f64(latency_ms / 1000.0).map_err(|_| {
                    Error::bad_request(format!("latency_ms out of range: {}", latency_ms))
                })?;
                metrics.record_invocation(latency, success)
            }
            MetricReport::Counter { key, delta } => {
                metrics.increment_counter(&key, delta);
            }
            MetricReport::Gauge { key, value } => metrics.set_gauge(&key, value),
            MetricReport::Event {
                event_type,
                payload,
            } => metrics.record_event(&event_type, payload),
        }
        Ok(metrics.snapshot())
    }

    pub async fn clear(&self, name: &str) -> Result<()> {
        let entry = self.entry(name).await?;
        entry.write().await.clear();
        info!("Cleared metrics for plugin: {}", name);
        Ok(())
    }

    /// The plugin entered `Enabled`; starts the uptime gauge
    pub async fn plugin_enabled(&self, name: &str) {
        if let Ok(entry) = self.entry(name).await {
            entry.write().await.mark_enabled();
        }
    }

    /// The plugin left `Enabled` for a non-running state
    pub async fn plugin_stopped(&self, name: &str) {
        if let Ok(entry) = self.entry(name).await {
            entry.write().await.mark_stopped();
        }
    }

    pub fn record_action(&self, outcome: ActionOutcomeKind) {
        self.actions.dispatched.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ActionOutcomeKind::Succeeded => &self.actions.succeeded,
            ActionOutcomeKind::NoOp => &self.actions.noop,
            ActionOutcomeKind::Failed => &self.actions.failed,
            ActionOutcomeKind::Rejected => &self.actions.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn process_counters(&self) -> ProcessCounters {
        ProcessCounters {
            uptime_secs: self.uptime().as_secs(),
            started_at: Some(self.started_at),
            actions_dispatched: self.actions.dispatched.load(Ordering::Relaxed),
            actions_succeeded: self.actions.succeeded.load(Ordering::Relaxed),
            actions_noop: self.actions.noop.load(Ordering::Relaxed),
            actions_failed: self.actions.failed.load(Ordering::Relaxed),
            actions_rejected: self.actions.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Server-wide aggregate across all plugins
    ///
    /// Each sample is copied under its own lock; no lock spans the whole walk.
    pub async fn overview(&self) -> MetricsOverview {
        let entries: Vec<(String, Arc<RwLock<PluginMetrics>>)> = {
            let plugins = self.plugins.read().await;
            plugins
                .iter()
                .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
                .collect()
        };

        let mut samples = BTreeMap::new();
        for (name, entry) in entries {
            let sample = entry.read().await.snapshot();
            samples.insert(name, sample);
        }

        let total_invocations: u64 = samples.values().map(|s| s.invocations).sum();
        let total_errors: u64 = samples.values().map(|s| s.errors).sum();
        let latencies: Vec<f64> = samples.values().filter_map(|s| s.last_latency_ms).collect();
        let avg_latency_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };

        let summary = OverviewSummary {
            total_plugins: samples.len(),
            plugins_with_metrics: samples.values().filter(|s| s.updated_at.is_some()).count(),
            total_invocations,
            total_errors,
            error_rate: if total_invocations == 0 {
                0.0
            } else {
                total_errors as f64 / total_invocations as f64
            },
            avg_latency_ms,
            timestamp: Utc::now(),
        };

        let top_plugins = TopPlugins {
            by_invocations: rank(&samples, |s| s.invocations),
            by_errors: rank(&samples, |s| s.errors),
        };

        MetricsOverview {
            summary,
            process: self.process_counters(),
            top_plugins,
            plugins: samples,
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn rank(
    samples: &BTreeMap<String, MetricSample>,
    key: impl Fn(&MetricSample) -> u64,
) -> Vec<RankedPlugin> {
    let mut ranked: Vec<RankedPlugin> = samples
        .iter()
        .map(|(name, sample)| RankedPlugin {
            plugin: name.clone(),
            value: key(sample),
        })
        .filter(|r| r.value > 0)
        .collect();
    // stable sort keeps name order among ties
    ranked.sort_by(|a, b| b.value.cmp(&a.value));
    ranked.truncate(TOP_LIMIT);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn aggregator_with(names: &[&str]) -> MetricsAggregator {
        let aggregator = MetricsAggregator::new();
        for name in names {
            aggregator.register(name, true).await;
        }
        aggregator
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_not_found() {
        let aggregator = aggregator_with(&["a"]).await;
        assert!(matches!(
            aggregator.for_plugin("missing").await,
            Err(Error::NotFound(_))
        ));
        assert!(aggregator
            .record_invocation("missing", Duration::from_millis(1), true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_overview_totals_and_ranking() {
        let aggregator = aggregator_with(&["a", "b", "c"]).await;
        for _ in 0..3 {
            aggregator
                .record_invocation("a", Duration::from_millis(10), true)
                .await
                .unwrap();
        }
        aggregator
            .record_invocation("b", Duration::from_millis(30), false)
            .await
            .unwrap();

        let overview = aggregator.overview().await;
        assert_eq!(overview.summary.total_plugins, 3);
        assert_eq!(overview.summary.plugins_with_metrics, 2);
        assert_eq!(overview.summary.total_invocations, 4);
        assert_eq!(overview.summary.total_errors, 1);
        assert!((overview.summary.error_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(overview.summary.avg_latency_ms, Some(20.0));

        let by_inv: Vec<_> = overview
            .top_plugins
            .by_invocations
            .iter()
            .map(|r| (r.plugin.as_str(), r.value))
            .collect();
        assert_eq!(by_inv, vec![("a", 3), ("b", 1)]);
        assert_eq!(overview.top_plugins.by_errors.len(), 1);
        assert_eq!(overview.top_plugins.by_errors[0].plugin, "b");
    }

    #[tokio::test]
    async fn test_report_and_clear() {
        let aggregator = aggregator_with(&["a"]).await;
        aggregator
            .report(
                "a",
                MetricReport::Counter {
                    key: "commands_executed".into(),
                    delta: 4,
                },
            )
            .await
            .unwrap();
        let sample = aggregator
            .report(
                "a",
                MetricReport::Gauge {
                    key: "players".into(),
                    value: json!(12),
                },
            )
            .await
            .unwrap();
        assert_eq!(sample.counters["commands_executed"], 4);
        assert_eq!(sample.gauges["players"], json!(12));

        let bad = aggregator
            .report(
                "a",
                MetricReport::Invocation {
                    latency_ms: -1.0,
                    success: true,
                },
            )
            .await;
        assert!(matches!(bad, Err(Error::BadRequest(_))));

        for latency_ms in [1e300, f64::INFINITY, f64::NAN] {
            let result = aggregator
                .report(
                    "a",
                    MetricReport::Invocation {
                        latency_ms,
                        success: true,
                    },
                )
                .await;
            assert!(matches!(result, Err(Error::BadRequest(_))), "{latency_ms}");
        }
        assert_eq!(aggregator.for_plugin("a").await.unwrap().invocations, 0);

        aggregator.clear("a").await.unwrap();
        let sample = aggregator.for_plugin("a").await.unwrap();
        assert!(sample.counters.is_empty());
        assert_eq!(sample.invocations, 0);
    }

    #[tokio::test]
    async fn test_process_counters() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_action(ActionOutcomeKind::Succeeded);
        aggregator.record_action(ActionOutcomeKind::Failed);
        aggregator.record_action(ActionOutcomeKind::Rejected);
        aggregator.record_action(ActionOutcomeKind::NoOp);

        let counters = aggregator.process_counters();
        assert_eq!(counters.actions_dispatched, 4);
        assert_eq!(counters.actions_succeeded, 1);
        assert_eq!(counters.actions_failed, 1);
        assert_eq!(counters.actions_rejected, 1);
        assert_eq!(counters.actions_noop, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_gauge_follows_lifecycle_edges() {
        let aggregator = aggregator_with(&["a"]).await;
        aggregator.register("idle", false).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(aggregator.for_plugin("a").await.unwrap().uptime_secs, 5);
        assert_eq!(aggregator.for_plugin("idle").await.unwrap().uptime_secs, 0);

        aggregator.plugin_stopped("a").await;
        assert_eq!(aggregator.for_plugin("a").await.unwrap().uptime_secs, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reports_keep_pairs_consistent() {
        let aggregator = Arc::new(aggregator_with(&["a", "b"]).await);

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let aggregator = Arc::clone(&aggregator);
                tokio::spawn(async move {
                    let name = if i % 2 == 0 { "a" } else { "b" };
                    for _ in 0..100 {
                        aggregator
                            .record_invocation(name, Duration::from_millis(1), false)
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move {
                for _ in 0..50 {
                    let overview = aggregator.overview().await;
                    for sample in overview.plugins.values() {
                        // every invocation in this test is an error
                        assert_eq!(sample.invocations, sample.errors);
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        futures::future::join_all(writers).await;
        reader.await.unwrap();

        let overview = aggregator.overview().await;
        assert_eq!(overview.summary.total_invocations, 800);
        assert_eq!(overview.summary.total_errors, 800);
    }
}
