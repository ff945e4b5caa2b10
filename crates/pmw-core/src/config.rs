//! Service Configuration
//!
//! Two layers, both loaded early in `main()`:
//!
//! 1. An environment file (`/etc/pluginmanager/environment` or `.env`) merged
//!    into the process environment without overriding existing variables.
//! 2. The service configuration file (YAML or JSON) describing the web
//!    listener, authentication, dispatcher limits and the installed plugins.
//!
//! ```no_run
//! use pmw_core::config::{load_environment, ServiceConfig};
//!
//! load_environment();
//! let config = ServiceConfig::load_default(None).expect("config");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::LifecycleState;

/// Alternative environment files to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &["/etc/pluginmanager/environment", ".env"];

/// Configuration files searched when no explicit path is given
pub const CONFIG_FILE_PATHS: &[&str] = &[
    "/etc/pluginmanager/config.yaml",
    "/etc/pluginmanager/config.json",
    "pluginmanager.yaml",
];

/// Placeholder admin token shipped in sample configs; refused at startup
pub const PLACEHOLDER_TOKEN: &str = "CHANGE_ME";

/// Load environment variables from the canonical environment file.
///
/// Checks `PMW_ENV_FILE` first, then [`ENV_FILE_PATHS`]. Existing variables
/// are never overridden. Returns the path that was loaded.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("PMW_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                if let Some((key, value)) = parse_env_line(line) {
                    if std::env::var(&key).is_err() {
                        std::env::set_var(&key, &value);
                        loaded_count += 1;
                        debug!(
                            "Loaded: {}={}",
                            key,
                            if key.contains("TOKEN") || key.contains("SECRET") {
                                "***"
                            } else {
                                &value
                            }
                        );
                    } else {
                        skipped_count += 1;
                    }
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );
            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse a single `KEY=VALUE` line, stripping matching quotes.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub web: WebSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    #[serde(default)]
    pub audit: AuditSettings,

    /// Plugins installed at startup
    #[serde(default)]
    pub plugins: Vec<PluginSettings>,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Hostname shown in the startup log (default: machine hostname)
    #[serde(default)]
    pub public_host: Option<String>,

    /// Source IPs allowed on authenticated routes (empty = all)
    ///
    /// Matched against the connection's peer address. Forwarding headers
    /// are only honoured when the peer is listed in `trusted_proxies`.
    #[serde(default)]
    pub allowed_ips: Vec<String>,

    /// Reverse proxies whose `X-Forwarded-For` / `X-Real-IP` are believed
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    #[serde(default = "default_true")]
    pub cors: bool,

    #[serde(default = "default_true")]
    pub compression: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Events buffered per `/ws/events` subscriber before it starts skipping
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    60
}

fn default_event_buffer() -> usize {
    256
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            public_host: None,
            allowed_ips: Vec::new(),
            trusted_proxies: Vec::new(),
            cors: true,
            compression: true,
            request_timeout_secs: default_request_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl WebSettings {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub admin_token: String,

    #[serde(default = "default_session_ttl")]
    pub session_ttl_hours: i64,

    #[serde(default = "default_session_cleanup")]
    pub session_cleanup_interval_secs: u64,
}

fn default_session_ttl() -> i64 {
    24
}

fn default_session_cleanup() -> u64 {
    300
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            admin_token: String::new(),
            session_ttl_hours: default_session_ttl(),
            session_cleanup_interval_secs: default_session_cleanup(),
        }
    }
}

/// Action dispatcher limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Upper bound on a single start/stop/reload call
    #[serde(default = "default_transition_timeout")]
    pub transition_timeout_secs: u64,

    /// Interpreter for plugin hooks, invoked as `<shell> -c <hook>`
    #[serde(default = "default_hook_shell")]
    pub hook_shell: String,
}

fn default_transition_timeout() -> u64 {
    30
}

fn default_hook_shell() -> String {
    "sh".to_string()
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            transition_timeout_secs: default_transition_timeout(),
            hook_shell: default_hook_shell(),
        }
    }
}

impl DispatcherSettings {
    pub fn transition_timeout(&self) -> Duration {
        Duration::from_secs(self.transition_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,
}

fn default_audit_capacity() -> usize {
    1000
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
        }
    }
}

/// Declared type of a plugin configuration option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Map,
}

impl OptionType {
    /// Whether a JSON value is acceptable for this option type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            OptionType::String => value.is_string(),
            OptionType::Integer => value.is_i64() || value.is_u64(),
            OptionType::Float => value.is_number(),
            OptionType::Boolean => value.is_boolean(),
            OptionType::List => value.is_array(),
            OptionType::Map => value.is_object(),
        }
    }
}

/// One entry of a plugin's configuration schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption {
    #[serde(rename = "type")]
    pub option_type: OptionType,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Shell commands run by the command-hook executor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookSettings {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default)]
    pub reload: Option<String>,
}

/// A plugin declared in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    pub name: String,

    #[serde(default = "default_plugin_version")]
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default = "default_initial_state")]
    pub initial_state: LifecycleState,

    #[serde(default)]
    pub schema: BTreeMap<String, ConfigOption>,

    #[serde(default)]
    pub values: serde_json::Map<String, Value>,

    #[serde(default)]
    pub hooks: HookSettings,
}

fn default_plugin_version() -> String {
    "0.0.0".to_string()
}

fn default_initial_state() -> LifecycleState {
    LifecycleState::Disabled
}

impl PluginSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_plugin_version(),
            description: String::new(),
            authors: Vec::new(),
            initial_state: default_initial_state(),
            schema: BTreeMap::new(),
            values: serde_json::Map::new(),
            hooks: HookSettings::default(),
        }
    }

    pub fn initial_state(mut self, state: LifecycleState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn option(mut self, name: impl Into<String>, option: ConfigOption) -> Self {
        self.schema.insert(name.into(), option);
        self
    }

    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn hooks(mut self, hooks: HookSettings) -> Self {
        self.hooks = hooks;
        self
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML or JSON file (chosen by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: Self = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from an explicit path, `PMW_CONFIG`, or the default locations.
    ///
    /// Falls back to defaults when no file exists. Environment overrides are
    /// applied and the result is validated.
    pub fn load_default(explicit: Option<&Path>) -> Result<Self> {
        let candidate: Option<PathBuf> = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("PMW_CONFIG").ok().map(PathBuf::from))
            .or_else(|| {
                CONFIG_FILE_PATHS
                    .iter()
                    .map(PathBuf::from)
                    .find(|p| p.exists())
            });

        let mut config = match candidate {
            Some(path) => Self::load(path)?,
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `PMW_ADMIN_TOKEN` and `PMW_BIND` from the environment
    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = std::env::var("PMW_ADMIN_TOKEN").ok().filter(|v| !v.is_empty()) {
            self.auth.admin_token = token;
        }

        if let Some(bind) = std::env::var("PMW_BIND").ok().filter(|v| !v.is_empty()) {
            self.set_bind(&bind);
        }
    }

    /// Set bind address (host:port format or just port)
    pub fn set_bind(&mut self, addr: &str) {
        if let Some((host, port)) = addr.rsplit_once(':') {
            self.web.bind_address = host.to_string();
            if let Ok(p) = port.parse() {
                self.web.port = p;
            }
        } else if let Ok(p) = addr.parse::<u16>() {
            self.web.port = p;
        }
    }

    /// Reject configurations the service must not start with
    pub fn validate(&self) -> Result<()> {
        let token = self.auth.admin_token.trim();
        if token.is_empty() || token == PLACEHOLDER_TOKEN {
            return Err(Error::config(
                "auth.admin_token must be set to a secure value (or PMW_ADMIN_TOKEN)",
            ));
        }

        if self.dispatcher.transition_timeout_secs == 0 {
            return Err(Error::config("dispatcher.transition_timeout_secs must be > 0"));
        }

        if self.web.event_buffer == 0 {
            return Err(Error::config("web.event_buffer must be > 0"));
        }

        let mut seen = std::collections::HashSet::new();
        for plugin in &self.plugins {
            if plugin.name.trim().is_empty() {
                return Err(Error::config("plugin names must not be empty"));
            }
            if !seen.insert(plugin.name.as_str()) {
                return Err(Error::config(format!(
                    "plugin '{}' is declared twice",
                    plugin.name
                )));
            }
            if plugin.initial_state.is_transient() {
                return Err(Error::config(format!(
                    "plugin '{}' cannot start in transient state {}",
                    plugin.name, plugin.initial_state
                )));
            }
        }

        Ok(())
    }
}
