//! Lifecycle records and configuration validation

use chrono::{DateTime, Utc};
use pmw_core::config::ConfigOption;
use pmw_core::LifecycleState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Current lifecycle state of one plugin
///
/// Mutators are crate-private: only the dispatcher moves a plugin between
/// states, and only through the transition table.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleRecord {
    pub state: LifecycleState,
    pub last_transition: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl LifecycleRecord {
    pub(crate) fn new(state: LifecycleState) -> Self {
        Self {
            state,
            last_transition: Utc::now(),
            last_error: None,
        }
    }

    /// Enter a transient state
    pub(crate) fn begin(&mut self, transient: LifecycleState) {
        debug_assert!(transient.is_transient());
        self.state = transient;
        self.last_transition = Utc::now();
    }

    pub(crate) fn complete(&mut self, state: LifecycleState) {
        self.state = state;
        self.last_transition = Utc::now();
        self.last_error = None;
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        let mut reason = reason.into();
        if reason.trim().is_empty() {
            reason = "transition failed".to_string();
        }
        self.state = LifecycleState::Failed;
        self.last_transition = Utc::now();
        self.last_error = Some(reason);
    }
}

/// Validation result for a plugin's configured values
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            valid: true,
            errors: vec![],
            warnings: vec![],
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Add an error (makes result invalid)
    pub fn with_error(
        mut self,
        path: impl Into<String>,
        message: impl Into<String>,
        code: &str,
    ) -> Self {
        self.valid = false;
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
            code: code.to_string(),
        });
        self
    }

    /// All error messages joined for logs and startup errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
    pub code: String,
}

/// Check configured values (and declared defaults) against a schema
pub fn validate_values(
    schema: &BTreeMap<String, ConfigOption>,
    values: &Map<String, Value>,
) -> ValidationResult {
    let mut result = ValidationResult::success();

    for (key, value) in values {
        match schema.get(key) {
            None => {
                result =
                    result.with_error(key, "option is not declared in the schema", "unknown_option")
            }
            Some(option) if !option.option_type.accepts(value) => {
                result = result.with_error(
                    key,
                    format!("expected {:?}, got {}", option.option_type, value),
                    "type_mismatch",
                )
            }
            Some(_) => {}
        }
    }

    for (key, option) in schema {
        if let Some(default) = &option.default {
            if !option.option_type.accepts(default) {
                result = result.with_error(
                    format!("{}.default", key),
                    format!("default does not match {:?}", option.option_type),
                    "type_mismatch",
                );
            }
        } else if !values.contains_key(key) {
            result = result.with_warning(format!("option '{}' has no default and no value", key));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmw_core::config::OptionType;
    use serde_json::json;

    fn schema() -> BTreeMap<String, ConfigOption> {
        let mut schema = BTreeMap::new();
        schema.insert(
            "port".to_string(),
            ConfigOption {
                option_type: OptionType::Integer,
                default: Some(json!(8080)),
                description: None,
            },
        );
        schema.insert(
            "motd".to_string(),
            ConfigOption {
                option_type: OptionType::String,
                default: None,
                description: Some("message of the day".into()),
            },
        );
        schema
    }

    #[test]
    fn test_valid_values() {
        let mut values = Map::new();
        values.insert("port".into(), json!(25565));
        values.insert("motd".into(), json!("hi"));
        let result = validate_values(&schema(), &values);
        assert!(result.valid);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_type_mismatch_and_unknown_option() {
        let mut values = Map::new();
        values.insert("port".into(), json!("not a number"));
        values.insert("colour".into(), json!("blue"));
        let result = validate_values(&schema(), &values);
        assert!(!result.valid);
        let codes: Vec<_> = result.errors.iter().map(|e| e.code.as_str()).collect();
        assert!(codes.contains(&"type_mismatch"));
        assert!(codes.contains(&"unknown_option"));
        assert!(result.error_summary().contains("colour"));
    }

    #[test]
    fn test_missing_value_without_default_warns() {
        let result = validate_values(&schema(), &Map::new());
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_failure_always_records_error() {
        let mut record = LifecycleRecord::new(LifecycleState::Enabled);
        record.begin(LifecycleState::Reloading);
        record.fail("");
        assert_eq!(record.state, LifecycleState::Failed);
        assert!(!record.last_error.as_deref().unwrap_or_default().is_empty());

        record.begin(LifecycleState::Starting);
        record.complete(LifecycleState::Enabled);
        assert!(record.last_error.is_none());
    }
}
