//! Action executors
//!
//! An executor performs the real work behind a lifecycle transition. The
//! dispatcher owns state bookkeeping; executors only report success or an
//! error.

use anyhow::Result;
use async_trait::async_trait;
use pmw_core::PluginAction;
use tracing::debug;

use crate::plugin::PluginDescriptor;

/// Performs the work of one lifecycle action
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, plugin: &PluginDescriptor, action: PluginAction) -> Result<()>;
}

/// Executor that accepts every action without doing anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutor;

#[async_trait]
impl ActionExecutor for NoopExecutor {
    async fn execute(&self, plugin: &PluginDescriptor, action: PluginAction) -> Result<()> {
        debug!("noop {} for plugin {}", action, plugin.name);
        Ok(())
    }
}

/// Executor that runs the shell hooks declared for each plugin
///
/// `start` runs for enable, `stop` for disable. Reload runs the `reload`
/// hook when one is declared, otherwise `stop` then `start`. A missing
/// hook succeeds. The child is killed if the transition is abandoned.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
}

impl CommandExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    async fn run_hook(
        &self,
        plugin: &PluginDescriptor,
        action: PluginAction,
        hook: Option<&str>,
    ) -> Result<()> {
        let Some(script) = hook.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(());
        };

        debug!("Running {} hook for plugin {}: {}", action, plugin.name, script);
        let output = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(script)
            .env("PMW_PLUGIN", &plugin.name)
            .env("PMW_ACTION", action.as_str())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let status = output
                .status
                .code()
                .map(|c| format!("exit status {}", c))
                .unwrap_or_else(|| "terminated by signal".to_string());
            if stderr.is_empty() {
                return Err(anyhow::anyhow!("{} hook failed: {}", action, status));
            }
            return Err(anyhow::anyhow!("{} hook failed ({}): {}", action, status, stderr));
        }

        Ok(())
    }
}

#[async_trait]
impl ActionExecutor for CommandExecutor {
    async fn execute(&self, plugin: &PluginDescriptor, action: PluginAction) -> Result<()> {
        let hooks = &plugin.hooks;
        match action {
            PluginAction::Enable => self.run_hook(plugin, action, hooks.start.as_deref()).await,
            PluginAction::Disable => self.run_hook(plugin, action, hooks.stop.as_deref()).await,
            PluginAction::Reload => match hooks.reload.as_deref() {
                Some(reload) => self.run_hook(plugin, action, Some(reload)).await,
                None => {
                    self.run_hook(plugin, action, hooks.stop.as_deref()).await?;
                    self.run_hook(plugin, action, hooks.start.as_deref()).await
                }
            },
        }
    }
}
