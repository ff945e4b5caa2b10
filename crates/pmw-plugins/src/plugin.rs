//! Plugin descriptors and the read-only views built from them

use chrono::{DateTime, Utc};
use pmw_core::config::{ConfigOption, HookSettings, PluginSettings};
use pmw_core::LifecycleState;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::state::LifecycleRecord;

/// Immutable description of an installed plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
    pub authors: Vec<String>,
    pub schema: BTreeMap<String, ConfigOption>,
    pub values: Map<String, Value>,
    #[serde(skip)]
    pub hooks: HookSettings,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from(PluginSettings::new(name))
    }

    /// Declared defaults overlaid with configured values
    pub fn effective_values(&self) -> Map<String, Value> {
        let mut values: Map<String, Value> = self
            .schema
            .iter()
            .filter_map(|(key, option)| option.default.clone().map(|d| (key.clone(), d)))
            .collect();
        for (key, value) in &self.values {
            values.insert(key.clone(), value.clone());
        }
        values
    }
}

impl From<PluginSettings> for PluginDescriptor {
    fn from(settings: PluginSettings) -> Self {
        Self {
            name: settings.name,
            version: settings.version,
            description: settings.description,
            authors: settings.authors,
            schema: settings.schema,
            values: settings.values,
            hooks: settings.hooks,
        }
    }
}

/// Entry of `GET /api/plugins`
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub state: LifecycleState,
    pub version: String,
    pub description: String,
}

/// Full plugin detail
#[derive(Debug, Clone, Serialize)]
pub struct PluginDetail {
    pub name: String,
    pub version: String,
    pub description: String,
    pub authors: Vec<String>,
    pub state: LifecycleState,
    pub enabled: bool,
    pub last_transition: DateTime<Utc>,
    pub last_error: Option<String>,
    pub config_options: Vec<String>,
}

impl PluginDetail {
    pub(crate) fn new(descriptor: &PluginDescriptor, record: &LifecycleRecord) -> Self {
        Self {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            description: descriptor.description.clone(),
            authors: descriptor.authors.clone(),
            state: record.state,
            enabled: record.state.is_enabled(),
            last_transition: record.last_transition,
            last_error: record.last_error.clone(),
            config_options: descriptor.schema.keys().cloned().collect(),
        }
    }
}

/// Schema plus current values
#[derive(Debug, Clone, Serialize)]
pub struct PluginConfigView {
    pub plugin: String,
    pub schema: BTreeMap<String, ConfigOption>,
    pub values: Map<String, Value>,
}

impl From<&PluginDescriptor> for PluginConfigView {
    fn from(descriptor: &PluginDescriptor) -> Self {
        Self {
            plugin: descriptor.name.clone(),
            schema: descriptor.schema.clone(),
            values: descriptor.effective_values(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmw_core::config::OptionType;
    use serde_json::json;

    #[test]
    fn test_effective_values_overlay_defaults() {
        let settings = PluginSettings::new("web")
            .option(
                "port",
                ConfigOption {
                    option_type: OptionType::Integer,
                    default: Some(json!(8080)),
                    description: None,
                },
            )
            .option(
                "motd",
                ConfigOption {
                    option_type: OptionType::String,
                    default: Some(json!("hello")),
                    description: None,
                },
            )
            .option(
                "token",
                ConfigOption {
                    option_type: OptionType::String,
                    default: None,
                    description: None,
                },
            )
            .value("port", json!(9000));

        let view = PluginConfigView::from(&PluginDescriptor::from(settings));
        assert_eq!(view.values["port"], json!(9000));
        assert_eq!(view.values["motd"], json!("hello"));
        assert!(!view.values.contains_key("token"));
        assert_eq!(view.schema.len(), 3);
    }
}
