//! Plugin registry
//!
//! The catalog of installed plugins. Each plugin's lifecycle record sits
//! behind its own lock, held only for the instant a record is read or
//! written and never across a transition, so reads never wait on an
//! in-flight action and unrelated plugins never contend.

use pmw_core::config::PluginSettings;
use pmw_core::{Error, LifecycleState, PluginAction, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::plugin::{PluginConfigView, PluginDescriptor, PluginDetail, PluginSummary};
use crate::state::{validate_values, LifecycleRecord};

/// Registered plugin: immutable descriptor plus its lifecycle record
pub(crate) struct RegisteredPlugin {
    pub(crate) descriptor: PluginDescriptor,
    pub(crate) record: RwLock<LifecycleRecord>,
}

/// Plugin lifecycle event
#[derive(Debug, Clone)]
pub enum PluginEvent {
    Registered {
        name: String,
        state: LifecycleState,
    },
    StateChanged {
        plugin: String,
        action: PluginAction,
        from: LifecycleState,
        to: LifecycleState,
    },
    TransitionFailed {
        plugin: String,
        action: PluginAction,
        error: String,
    },
}

/// Hook handler type
pub type HookHandler = Arc<dyn Fn(&PluginEvent) + Send + Sync>;

/// Plugin registry
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Arc<RwLock<BTreeMap<String, Arc<RegisteredPlugin>>>>,
    hooks: Arc<RwLock<Vec<HookHandler>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for plugin events
    pub async fn register_hook(&self, handler: HookHandler) {
        self.hooks.write().await.push(handler);
    }

    pub(crate) async fn emit_event(&self, event: PluginEvent) {
        let hooks = self.hooks.read().await;
        for hook in hooks.iter() {
            hook(&event);
        }
    }

    /// Register a plugin declared at startup
    pub async fn register(&self, settings: PluginSettings) -> Result<()> {
        let initial_state = settings.initial_state;
        if initial_state.is_transient() {
            return Err(Error::config(format!(
                "plugin '{}' cannot start in transient state {}",
                settings.name, initial_state
            )));
        }

        let validation = validate_values(&settings.schema, &settings.values);
        if !validation.valid {
            return Err(Error::config(format!(
                "invalid configuration for plugin '{}': {}",
                settings.name,
                validation.error_summary()
            )));
        }
        for warning in &validation.warnings {
            warn!("Plugin '{}': {}", settings.name, warning);
        }

        let descriptor = PluginDescriptor::from(settings);
        let name = descriptor.name.clone();

        {
            let mut plugins = self.plugins.write().await;
            if plugins.contains_key(&name) {
                return Err(Error::config(format!("Plugin '{}' is already registered", name)));
            }
            plugins.insert(
                name.clone(),
                Arc::new(RegisteredPlugin {
                    descriptor,
                    record: RwLock::new(LifecycleRecord::new(initial_state)),
                }),
            );
        }

        info!("Registered plugin: {} ({})", name, initial_state);
        self.emit_event(PluginEvent::Registered {
            name,
            state: initial_state,
        })
        .await;
        Ok(())
    }

    pub(crate) async fn entry(&self, name: &str) -> Result<Arc<RegisteredPlugin>> {
        self.plugins
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(name))
    }

    async fn entries(&self) -> Vec<Arc<RegisteredPlugin>> {
        self.plugins.read().await.values().cloned().collect()
    }

    /// All plugins, ordered by name
    pub async fn list(&self) -> Vec<PluginSummary> {
        let mut summaries = Vec::new();
        for entry in self.entries().await {
            let state = entry.record.read().await.state;
            summaries.push(PluginSummary {
                name: entry.descriptor.name.clone(),
                state,
                version: entry.descriptor.version.clone(),
                description: entry.descriptor.description.clone(),
            });
        }
        summaries
    }

    pub async fn get(&self, name: &str) -> Result<PluginDetail> {
        let entry = self.entry(name).await?;
        let record = entry.record.read().await;
        Ok(PluginDetail::new(&entry.descriptor, &record))
    }

    pub async fn get_config(&self, name: &str) -> Result<PluginConfigView> {
        let entry = self.entry(name).await?;
        Ok(PluginConfigView::from(&entry.descriptor))
    }

    pub async fn state_of(&self, name: &str) -> Result<LifecycleState> {
        let entry = self.entry(name).await?;
        let state = entry.record.read().await.state;
        Ok(state)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.plugins.read().await.contains_key(name)
    }

    /// Number of plugins in each state; every state is present
    pub async fn count_by_state(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = LifecycleState::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for entry in self.entries().await {
            let state = entry.record.read().await.state;
            *counts.entry(state.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub async fn count(&self) -> usize {
        self.plugins.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmw_core::config::{ConfigOption, OptionType};
    use serde_json::json;
    use std::sync::Mutex;

    async fn registry() -> PluginRegistry {
        let registry = PluginRegistry::new();
        registry
            .register(PluginSettings::new("Zeta").initial_state(LifecycleState::Enabled))
            .await
            .unwrap();
        registry
            .register(PluginSettings::new("Alpha").version("1.2.0"))
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_name() {
        let registry = registry().await;
        let names: Vec<_> = registry.list().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn test_get_and_not_found() {
        let registry = registry().await;
        let detail = registry.get("Alpha").await.unwrap();
        assert_eq!(detail.version, "1.2.0");
        assert_eq!(detail.state, LifecycleState::Disabled);
        assert!(!detail.enabled);
        assert!(detail.last_error.is_none());

        assert!(matches!(registry.get("Unknown").await, Err(Error::NotFound(_))));
        assert!(matches!(registry.get_config("Unknown").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = registry().await;
        let err = registry.register(PluginSettings::new("Alpha")).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_schema_mismatch_rejected() {
        let registry = PluginRegistry::new();
        let settings = PluginSettings::new("web")
            .option(
                "port",
                ConfigOption {
                    option_type: OptionType::Integer,
                    default: Some(json!(8080)),
                    description: None,
                },
            )
            .value("port", json!("eighty"));
        assert!(registry.register(settings).await.is_err());
        assert!(!registry.contains("web").await);
    }

    #[tokio::test]
    async fn test_count_by_state() {
        let registry = registry().await;
        let counts = registry.count_by_state().await;
        assert_eq!(counts["Enabled"], 1);
        assert_eq!(counts["Disabled"], 1);
        assert_eq!(counts["Failed"], 0);
        assert_eq!(counts.len(), LifecycleState::ALL.len());
    }

    #[tokio::test]
    async fn test_hooks_receive_registration() {
        let registry = PluginRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry
            .register_hook(Arc::new(move |event: &PluginEvent| {
                if let PluginEvent::Registered { name, .. } = event {
                    sink.lock().unwrap().push(name.clone());
                }
            }))
            .await;

        registry.register(PluginSettings::new("a")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string()]);
    }
}
