//! pluginmanager-web service
//!
//! Hosts the plugin registry, action dispatcher and metrics aggregator
//! behind the bearer-token HTTP API.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pmw_core::{AuditLog, IpAllowList, ServiceConfig, StaticTokenVerifier};
use pmw_http::{HttpServer, MiddlewareConfig};
use pmw_metrics::MetricsAggregator;
use pmw_plugins::{
    ActionDispatcher, ActionExecutor, CommandExecutor, NoopExecutor, PluginEvent, PluginRegistry,
};
use pmw_web::{AppState, GatewayOptions};

#[derive(Parser, Debug)]
#[command(name = "pmw-service")]
#[command(about = "Plugin management server with an authenticated HTTP API")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (host:port), overrides the configuration file
    #[arg(short, long)]
    bind: Option<String>,

    /// How lifecycle actions are carried out
    #[arg(long, value_enum, default_value_t = ExecutorKind::Command)]
    executor: ExecutorKind,

    /// Issue a session token for this user at startup and print it
    #[arg(long)]
    issue_session: Option<String>,

    /// Disable CORS
    #[arg(long)]
    no_cors: bool,

    /// Disable compression
    #[arg(long)]
    no_compression: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and list the declared plugins
    CheckConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ExecutorKind {
    /// Run each plugin's start/stop/reload hooks
    Command,
    /// Accept every action without side effects
    Noop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load environment from /etc/pluginmanager/environment (if exists)
    let env_file = pmw_core::config::load_environment();

    init_tracing(args.log_json)?;
    if let Some(path) = env_file {
        info!("Loaded environment from {}", path);
    }

    let mut config = ServiceConfig::load_default(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(bind) = &args.bind {
        config.set_bind(bind);
    }

    if let Some(Commands::CheckConfig) = args.command {
        return check_config(&config);
    }

    // --- 1. Plugins ---
    let registry = PluginRegistry::new();
    registry.register_hook(Arc::new(log_plugin_event)).await;

    let metrics = Arc::new(MetricsAggregator::new());
    let executor: Arc<dyn ActionExecutor> = match args.executor {
        ExecutorKind::Command => {
            Arc::new(CommandExecutor::new(config.dispatcher.hook_shell.as_str()))
        }
        ExecutorKind::Noop => Arc::new(NoopExecutor),
    };
    let dispatcher = ActionDispatcher::new(registry, executor, metrics)
        .with_timeout(config.dispatcher.transition_timeout());

    for plugin in config.plugins.iter().cloned() {
        let name = plugin.name.clone();
        dispatcher
            .install(plugin)
            .await
            .with_context(|| format!("failed to install plugin '{}'", name))?;
    }
    info!(
        "Installed {} plugins ({:?} executor, {}s transition timeout)",
        config.plugins.len(),
        args.executor,
        config.dispatcher.transition_timeout_secs
    );

    // --- 2. Authentication ---
    let verifier = Arc::new(StaticTokenVerifier::new(config.auth.admin_token.clone()));
    if let Some(user) = &args.issue_session {
        let session = verifier
            .create_session(
                user.as_str(),
                "operator",
                chrono::Duration::hours(config.auth.session_ttl_hours),
            )
            .await;
        println!("Session token for {}: {}", user, session.token);
        info!("Session for {} expires at {}", user, session.expires_at);
    }
    let cleanup = spawn_session_cleanup(
        Arc::clone(&verifier),
        Duration::from_secs(config.auth.session_cleanup_interval_secs.max(1)),
    );

    let options = GatewayOptions {
        allow_list: IpAllowList::new(&config.web.allowed_ips),
        trusted_proxies: IpAllowList::new(&config.web.trusted_proxies),
        event_buffer: config.web.event_buffer,
    };
    if !options.allow_list.is_empty() {
        info!("Source IP allow-list: {:?}", config.web.allowed_ips);
    }
    if !options.trusted_proxies.is_empty() {
        info!("Trusting forwarding headers from: {:?}", config.web.trusted_proxies);
    }

    // --- 3. HTTP ---
    let audit = Arc::new(AuditLog::new(config.audit.capacity));
    let state = Arc::new(AppState::new(dispatcher, verifier, audit, options).await);
    let router = pmw_web::create_router(state);

    let middleware = MiddlewareConfig::new()
        .cors(config.web.cors && !args.no_cors)
        .compression(config.web.compression && !args.no_compression)
        .timeout(config.web.request_timeout());

    let mut builder = HttpServer::builder()
        .bind(config.web.bind())
        .router(router)
        .middleware(middleware);
    if let Some(host) = &config.web.public_host {
        builder = builder.public_host(host.as_str());
    }
    let server = builder.build()?;
    info!(
        "Serving {} plugins as {}",
        config.plugins.len(),
        server.config().public_host
    );

    let result = server.serve().await;
    cleanup.abort();
    if let Err(e) = &result {
        error!("Server error: {}", e);
    }
    result?;
    Ok(())
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("pmw_service=info".parse()?)
        .add_directive("pmw_http=info".parse()?)
        .add_directive("pmw_web=info".parse()?)
        .add_directive("pmw_plugins=info".parse()?)
        .add_directive("tower_http=debug".parse()?);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn log_plugin_event(event: &PluginEvent) {
    match event {
        PluginEvent::Registered { name, state } => info!("Plugin {} registered ({})", name, state),
        PluginEvent::StateChanged {
            plugin,
            action,
            from,
            to,
        } => info!("Plugin {} {}: {} -> {}", plugin, action, from, to),
        PluginEvent::TransitionFailed {
            plugin,
            action,
            error,
        } => warn!("Plugin {} {} failed: {}", plugin, action, error),
    }
}

fn spawn_session_cleanup(
    verifier: Arc<StaticTokenVerifier>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            verifier.cleanup_expired().await;
        }
    })
}

fn check_config(config: &ServiceConfig) -> Result<()> {
    for plugin in &config.plugins {
        let validation = pmw_plugins::state::validate_values(&plugin.schema, &plugin.values);
        if !validation.valid {
            anyhow::bail!(
                "plugin '{}' has invalid values: {}",
                plugin.name,
                validation.error_summary()
            );
        }
        for warning in &validation.warnings {
            println!("warning: {}: {}", plugin.name, warning);
        }
    }

    println!("Configuration OK");
    println!("  listen:     {}", config.web.bind());
    let allow_list = if config.web.allowed_ips.is_empty() {
        "(any)".to_string()
    } else {
        config.web.allowed_ips.join(", ")
    };
    println!("  allow-list: {}", allow_list);
    if !config.web.trusted_proxies.is_empty() {
        println!("  proxies:    {}", config.web.trusted_proxies.join(", "));
    }
    println!("  hook shell: {}", config.dispatcher.hook_shell);
    println!("  timeout:    {}s", config.dispatcher.transition_timeout_secs);
    println!("  plugins:    {}", config.plugins.len());
    for plugin in &config.plugins {
        println!(
            "    {} {} ({}, {} options)",
            plugin.name,
            plugin.version,
            plugin.initial_state,
            plugin.schema.len()
        );
    }
    Ok(())
}
