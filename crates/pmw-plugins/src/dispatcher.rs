//! Action dispatcher
//!
//! Applies lifecycle actions to plugins. Serialization is per plugin and
//! reject-on-conflict: the state check and the move into the transient
//! state happen under the plugin's record lock, so a second request for the
//! same plugin sees the transient state and is turned away. The executor
//! runs in its own task with no lock held and always runs to completion,
//! even when the caller goes away.

use chrono::{DateTime, Utc};
use pmw_core::config::PluginSettings;
use pmw_core::{ActionRequest, Error, LifecycleState, PluginAction, Result};
use pmw_metrics::{ActionOutcomeKind, MetricsAggregator};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::executor::ActionExecutor;
use crate::lifecycle::{self, Plan};
use crate::registry::{PluginEvent, PluginRegistry, RegisteredPlugin};

const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a dispatched action
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub plugin: String,
    pub action: PluginAction,
    pub previous_state: LifecycleState,
    pub state: LifecycleState,
    /// False for idempotent requests where nothing ran
    pub changed: bool,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Routes lifecycle actions to the executor and keeps the registry in step
#[derive(Clone)]
pub struct ActionDispatcher {
    registry: PluginRegistry,
    executor: Arc<dyn ActionExecutor>,
    metrics: Arc<MetricsAggregator>,
    timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(
        registry: PluginRegistry,
        executor: Arc<dyn ActionExecutor>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            registry,
            executor,
            metrics,
            timeout: DEFAULT_TRANSITION_TIMEOUT,
        }
    }

    /// Upper bound for one executor call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Register a plugin and start tracking its metrics
    pub async fn install(&self, settings: PluginSettings) -> Result<()> {
        let name = settings.name.clone();
        let enabled = settings.initial_state.is_enabled();
        self.registry.register(settings).await?;
        self.metrics.register(&name, enabled).await;
        Ok(())
    }

    /// Apply an action and wait for the plugin to settle
    pub async fn dispatch(&self, request: ActionRequest) -> Result<DispatchOutcome> {
        let started = Instant::now();
        let action = request.action;
        let entry = self.registry.entry(&request.plugin).await?;

        let (from, plan) = {
            let mut record = entry.record.write().await;
            let from = record.state;
            match lifecycle::plan(&request.plugin, from, action) {
                Ok(plan) => {
                    if let Plan::Transition { via, .. } = plan {
                        record.begin(via);
                    }
                    (from, plan)
                }
                Err(e) => {
                    drop(record);
                    self.metrics.record_action(ActionOutcomeKind::Rejected);
                    debug!(
                        plugin = %request.plugin, %action, state = %from,
                        "Action rejected: {}", e
                    );
                    return Err(e);
                }
            }
        };

        let on_success = match plan {
            Plan::NoOp => {
                self.metrics.record_action(ActionOutcomeKind::NoOp);
                debug!(plugin = %request.plugin, %action, state = %from, "Action is a no-op");
                return Ok(DispatchOutcome {
                    plugin: request.plugin,
                    action,
                    previous_state: from,
                    state: from,
                    changed: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                    completed_at: Utc::now(),
                });
            }
            Plan::Transition { on_success, .. } => on_success,
        };

        info!(
            plugin = %request.plugin,
            %action,
            requested_by = request.requested_by.as_deref().unwrap_or("-"),
            "Dispatching action"
        );

        // The transition owns its own task so it finishes even if this
        // future is dropped mid-flight.
        let dispatcher = self.clone();
        let transition = tokio::spawn(async move {
            dispatcher
                .run_transition(entry, action, from, on_success, started)
                .await
        });

        transition
            .await
            .map_err(|e| Error::internal(format!("transition task failed: {}", e)))?
    }

    async fn run_transition(
        &self,
        entry: Arc<RegisteredPlugin>,
        action: PluginAction,
        from: LifecycleState,
        on_success: LifecycleState,
        started: Instant,
    ) -> Result<DispatchOutcome> {
        let plugin = entry.descriptor.name.clone();
        let result = self.execute(Arc::clone(&entry), action).await;

        // State and uptime gauge change under the same record lock
        let to = {
            let mut record = entry.record.write().await;
            match &result {
                Ok(()) => record.complete(on_success),
                Err(reason) => record.fail(reason.clone()),
            }
            if record.state.is_enabled() {
                self.metrics.plugin_enabled(&plugin).await;
            } else {
                self.metrics.plugin_stopped(&plugin).await;
            }
            record.state
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                self.metrics.record_action(ActionOutcomeKind::Succeeded);
                info!(
                    plugin = %plugin, %action, from = %from, to = %to, duration_ms,
                    "Transition complete"
                );
                self.registry
                    .emit_event(PluginEvent::StateChanged {
                        plugin: plugin.clone(),
                        action,
                        from,
                        to,
                    })
                    .await;
                Ok(DispatchOutcome {
                    plugin,
                    action,
                    previous_state: from,
                    state: to,
                    changed: true,
                    duration_ms,
                    completed_at: Utc::now(),
                })
            }
            Err(reason) => {
                self.metrics.record_action(ActionOutcomeKind::Failed);
                error!(
                    plugin = %plugin, %action, from = %from, duration_ms,
                    "Transition failed: {}", reason
                );
                self.registry
                    .emit_event(PluginEvent::TransitionFailed {
                        plugin: plugin.clone(),
                        action,
                        error: reason.clone(),
                    })
                    .await;
                Err(Error::TransitionFailed { plugin, reason })
            }
        }
    }

    /// Run the executor under the transition timeout
    async fn execute(
        &self,
        entry: Arc<RegisteredPlugin>,
        action: PluginAction,
    ) -> std::result::Result<(), String> {
        let executor = Arc::clone(&self.executor);
        let mut handle =
            tokio::spawn(async move { executor.execute(&entry.descriptor, action).await });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
            Ok(Err(e)) if e.is_panic() => Err(format!("{} executor panicked", action)),
            Ok(Err(e)) => Err(format!("{} executor was cancelled: {}", action, e)),
            Err(_) => {
                handle.abort();
                warn!(%action, timeout_secs = self.timeout.as_secs_f64(), "Executor timed out");
                Err(format!("{} timed out after {:?}", action, self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    use crate::executor::NoopExecutor;
    use crate::plugin::PluginDescriptor;

    struct FailingExecutor;

    #[async_trait]
    impl ActionExecutor for FailingExecutor {
        async fn execute(&self, _: &PluginDescriptor, _: PluginAction) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("hook exploded"))
        }
    }

    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ActionExecutor for CountingExecutor {
        async fn execute(&self, _: &PluginDescriptor, _: PluginAction) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Blocks until released
    #[derive(Default)]
    struct GatedExecutor {
        gate: Notify,
    }

    #[async_trait]
    impl ActionExecutor for GatedExecutor {
        async fn execute(&self, _: &PluginDescriptor, _: PluginAction) -> anyhow::Result<()> {
            self.gate.notified().await;
            Ok(())
        }
    }

    struct SleepingExecutor(Duration);

    #[async_trait]
    impl ActionExecutor for SleepingExecutor {
        async fn execute(&self, _: &PluginDescriptor, _: PluginAction) -> anyhow::Result<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    struct PanickingExecutor;

    #[async_trait]
    impl ActionExecutor for PanickingExecutor {
        async fn execute(&self, _: &PluginDescriptor, _: PluginAction) -> anyhow::Result<()> {
            panic!("executor bug");
        }
    }

    async fn dispatcher(
        executor: Arc<dyn ActionExecutor>,
        plugins: &[(&str, LifecycleState)],
    ) -> ActionDispatcher {
        let dispatcher = ActionDispatcher::new(
            PluginRegistry::new(),
            executor,
            Arc::new(MetricsAggregator::new()),
        );
        for (name, state) in plugins {
            dispatcher
                .install(PluginSettings::new(*name).initial_state(*state))
                .await
                .unwrap();
        }
        dispatcher
    }

    async fn wait_for_transient(dispatcher: &ActionDispatcher, name: &str) {
        while !dispatcher
            .registry()
            .state_of(name)
            .await
            .unwrap()
            .is_transient()
        {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_successful_transitions() {
        let cases = [
            (LifecycleState::Disabled, PluginAction::Enable, LifecycleState::Enabled),
            (LifecycleState::Failed, PluginAction::Enable, LifecycleState::Enabled),
            (LifecycleState::Stopped, PluginAction::Enable, LifecycleState::Enabled),
            (LifecycleState::Enabled, PluginAction::Disable, LifecycleState::Disabled),
            (LifecycleState::Enabled, PluginAction::Reload, LifecycleState::Enabled),
        ];

        for (from, action, expected) in cases {
            let dispatcher = dispatcher(Arc::new(NoopExecutor), &[("p", from)]).await;
            let outcome = dispatcher.dispatch(ActionRequest::new("p", action)).await.unwrap();
            assert_eq!(outcome.previous_state, from);
            assert_eq!(outcome.state, expected);
            assert!(outcome.changed);

            let detail = dispatcher.registry().get("p").await.unwrap();
            assert_eq!(detail.state, expected);
            assert!(detail.last_error.is_none());
        }
    }

    #[tokio::test]
    async fn test_failed_transitions_end_in_failed() {
        for (from, action) in [
            (LifecycleState::Disabled, PluginAction::Enable),
            (LifecycleState::Enabled, PluginAction::Disable),
            (LifecycleState::Enabled, PluginAction::Reload),
        ] {
            let dispatcher = dispatcher(Arc::new(FailingExecutor), &[("p", from)]).await;
            let err = dispatcher.dispatch(ActionRequest::new("p", action)).await.unwrap_err();
            assert!(matches!(err, Error::TransitionFailed { .. }));

            let detail = dispatcher.registry().get("p").await.unwrap();
            assert_eq!(detail.state, LifecycleState::Failed);
            assert!(detail.last_error.unwrap().contains("hook exploded"));
        }
    }

    #[tokio::test]
    async fn test_noop_does_not_call_executor() {
        let executor = Arc::new(CountingExecutor::default());
        let dispatcher = dispatcher(
            executor.clone(),
            &[("on", LifecycleState::Enabled), ("off", LifecycleState::Disabled)],
        )
        .await;

        let outcome = dispatcher
            .dispatch(ActionRequest::new("on", PluginAction::Enable))
            .await
            .unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.state, LifecycleState::Enabled);

        let outcome = dispatcher
            .dispatch(ActionRequest::new("off", PluginAction::Disable))
            .await
            .unwrap();
        assert!(!outcome.changed);

        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.metrics().process_counters().actions_noop, 2);
    }

    #[tokio::test]
    async fn test_rejections_touch_nothing() {
        let executor = Arc::new(CountingExecutor::default());
        let dispatcher = dispatcher(executor.clone(), &[("p", LifecycleState::Disabled)]).await;

        let err = dispatcher
            .dispatch(ActionRequest::new("p", PluginAction::Reload))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let err = dispatcher
            .dispatch(ActionRequest::new("missing", PluginAction::Enable))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        assert_eq!(dispatcher.registry().state_of("p").await.unwrap(), LifecycleState::Disabled);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.metrics().process_counters().actions_rejected, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_action_conflicts() {
        let executor = Arc::new(GatedExecutor::default());
        let dispatcher = dispatcher(executor.clone(), &[("p", LifecycleState::Disabled)]).await;

        let first = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(ActionRequest::new("p", PluginAction::Enable))
                    .await
            })
        };
        wait_for_transient(&dispatcher, "p").await;

        // Reads are served while the transition is in flight
        assert_eq!(
            dispatcher.registry().get("p").await.unwrap().state,
            LifecycleState::Starting
        );

        let err = dispatcher
            .dispatch(ActionRequest::new("p", PluginAction::Disable))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict {
                state: LifecycleState::Starting,
                ..
            }
        ));

        executor.gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.state, LifecycleState::Enabled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transition_survives_dropped_caller() {
        let executor = Arc::new(GatedExecutor::default());
        let dispatcher = dispatcher(executor.clone(), &[("p", LifecycleState::Disabled)]).await;

        let caller = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(ActionRequest::new("p", PluginAction::Enable))
                    .await
            })
        };
        wait_for_transient(&dispatcher, "p").await;
        caller.abort();
        executor.gate.notify_one();

        while dispatcher.registry().state_of("p").await.unwrap() != LifecycleState::Enabled {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_failed() {
        let dispatcher = dispatcher(
            Arc::new(SleepingExecutor(Duration::from_secs(3600))),
            &[("slow", LifecycleState::Disabled)],
        )
        .await
        .with_timeout(Duration::from_secs(2));

        let err = dispatcher
            .dispatch(ActionRequest::new("slow", PluginAction::Enable))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransitionFailed { .. }));

        let detail = dispatcher.registry().get("slow").await.unwrap();
        assert_eq!(detail.state, LifecycleState::Failed);
        assert!(detail.last_error.unwrap().contains("timed out"));
        assert_eq!(dispatcher.metrics().process_counters().actions_failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_executor_marks_failed() {
        let dispatcher =
            dispatcher(Arc::new(PanickingExecutor), &[("p", LifecycleState::Enabled)]).await;

        let err = dispatcher
            .dispatch(ActionRequest::new("p", PluginAction::Reload))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransitionFailed { .. }));

        let detail = dispatcher.registry().get("p").await.unwrap();
        assert_eq!(detail.state, LifecycleState::Failed);
        assert!(detail.last_error.unwrap().contains("panicked"));

        // A failed plugin can be enabled again
        let dispatcher = ActionDispatcher {
            executor: Arc::new(NoopExecutor),
            ..dispatcher
        };
        let outcome = dispatcher
            .dispatch(ActionRequest::new("p", PluginAction::Enable))
            .await
            .unwrap();
        assert_eq!(outcome.state, LifecycleState::Enabled);
        assert!(dispatcher.registry().get("p").await.unwrap().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plugins_transition_independently() {
        let dispatcher = dispatcher(
            Arc::new(SleepingExecutor(Duration::from_millis(200))),
            &[("a", LifecycleState::Disabled), ("b", LifecycleState::Disabled)],
        )
        .await;

        let started = Instant::now();
        let (a, b) = tokio::join!(
            dispatcher.dispatch(ActionRequest::new("a", PluginAction::Enable)),
            dispatcher.dispatch(ActionRequest::new("b", PluginAction::Enable)),
        );
        assert_eq!(a.unwrap().state, LifecycleState::Enabled);
        assert_eq!(b.unwrap().state, LifecycleState::Enabled);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_state_change_events_and_uptime_edges() {
        let dispatcher =
            dispatcher(Arc::new(NoopExecutor), &[("p", LifecycleState::Enabled)]).await;
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        dispatcher
            .registry()
            .register_hook(Arc::new(move |event: &PluginEvent| {
                if let PluginEvent::StateChanged { from, to, .. } = event {
                    sink.lock().unwrap().push((*from, *to));
                }
            }))
            .await;

        dispatcher
            .dispatch(ActionRequest::new("p", PluginAction::Disable))
            .await
            .unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![(LifecycleState::Enabled, LifecycleState::Disabled)]
        );
        assert_eq!(dispatcher.metrics().for_plugin("p").await.unwrap().uptime_secs, 0);
        assert_eq!(dispatcher.metrics().process_counters().actions_succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_gauge_tracks_state_under_contention() {
        let names: Vec<String> = (0..8).map(|i| format!("p{}", i)).collect();
        let plugins: Vec<(&str, LifecycleState)> = names
            .iter()
            .map(|n| (n.as_str(), LifecycleState::Disabled))
            .collect();
        let dispatcher = dispatcher(Arc::new(NoopExecutor), &plugins).await;

        let mut tasks = Vec::new();
        for round in 0..50 {
            for name in &names {
                let dispatcher = dispatcher.clone();
                let action = if round % 2 == 0 {
                    PluginAction::Enable
                } else {
                    PluginAction::Disable
                };
                let request = ActionRequest::new(name.clone(), action);
                tasks.push(tokio::spawn(async move {
                    // Conflicts are expected; only the end state matters
                    let _ = dispatcher.dispatch(request).await;
                }));
            }
        }
        for task in tasks {
            task.await.unwrap();
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        for name in &names {
            let state = dispatcher.registry().state_of(name).await.unwrap();
            let uptime = dispatcher.metrics().for_plugin(name).await.unwrap().uptime_secs;
            assert_eq!(state.is_enabled(), uptime >= 5, "{name}: {state} with uptime {uptime}");
        }
    }
}
