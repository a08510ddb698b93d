//! `secret-brokerd`: the approval broker daemon. Wires the orchestrator to
//! the local transport, the HTTP callback listener, and the filesystem
//! poller, and owns the daemon lifecycle (PID file, signal handling,
//! teardown).

use std::env;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use signal_hook::flag;

use broker::audit::AuditSink;
use broker::cache::ValueCache;
use broker::channel::{LogChannel, NotificationChannel};
use broker::config::Config;
use broker::fs_poller::FsPoller;
use broker::http_callback::HttpCallbackListener;
use broker::orchestrator::{Orchestrator, OrchestratorConfig};
use broker::provider::{SecretProvider, StaticProvider};
use broker::registry::Registry;
use broker::transport::LocalTransport;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = real_main() {
        tracing::error!(error = %err, "secret-brokerd exiting");
        let _ = writeln!(std::io::stderr(), "secret-brokerd: {err:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let config_path = parse_args()?.unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let provider = build_provider(&config.raw.provider.name)?;
    if let Err(err) = provider.validate() {
        bail!("provider '{}' failed validation: {err}", provider.name());
    }

    let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();
    for name in config.raw.channels.keys() {
        let channel = build_channel(name)?;
        if let Err(err) = channel.validate() {
            bail!("channel '{name}' failed validation: {err}");
        }
        channels.push(channel);
    }

    let audit = AuditSink::open(&config.audit_log_path)
        .with_context(|| format!("failed to open audit log {}", config.audit_log_path.display()))?;
    audit.record("daemon_start", serde_json::json!({"pid": std::process::id()}));

    let registry = Registry::new();
    let orchestrator = Arc::new(Orchestrator {
        config: OrchestratorConfig {
            open_containers: config.raw.open_containers.clone(),
            gated_containers: config.raw.gated_containers.clone(),
            standing_rules: config.raw.standing_rules.clone(),
            approval_timeout: config.approval_timeout(),
        },
        provider,
        channels,
        cache: ValueCache::new(config.raw.cache_ttl_ms),
        registry: Arc::clone(&registry),
        audit,
    });

    write_pid_file(&config.pid_file);

    let transport = LocalTransport::bind(&config.transport_socket_path)
        .with_context(|| format!("failed to bind local transport at {}", config.transport_socket_path.display()))?;
    let http = HttpCallbackListener::bind(config.raw.http_port)
        .with_context(|| format!("failed to bind http callback listener on port {}", config.raw.http_port))?;
    let poller = FsPoller::new(config.pending_drop_dir.clone())
        .with_context(|| format!("failed to create pending drop directory {}", config.pending_drop_dir.display()))?;

    let running = Arc::new(AtomicBool::new(true));
    for signal in [libc::SIGTERM, libc::SIGINT] {
        flag::register(signal, Arc::clone(&running)).context("failed to register signal handler")?;
    }

    let started_at = Instant::now();
    let transport_running = Arc::clone(&running);
    let transport_orchestrator = Arc::clone(&orchestrator);
    let transport_handle = std::thread::spawn(move || {
        transport.serve(transport_orchestrator, started_at, transport_running);
    });

    let http_running = Arc::clone(&running);
    let http_registry = Arc::clone(&registry);
    let http_handle = std::thread::spawn(move || {
        http.serve(http_registry, http_running);
    });

    let poller_running = Arc::clone(&running);
    let poller_registry = Arc::clone(&registry);
    let poller_handle = std::thread::spawn(move || {
        poller.run(poller_registry, poller_running);
    });

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    tracing::info!("shutdown signal received, tearing down");
    registry.deny_all();
    orchestrator.audit.record("daemon_stop", serde_json::json!({"pid": std::process::id()}));
    let _ = std::fs::remove_file(&config.pid_file);

    let _ = transport_handle.join();
    let _ = http_handle.join();
    let _ = poller_handle.join();

    Ok(())
}

fn parse_args() -> Result<Option<std::path::PathBuf>> {
    let mut args = env::args().skip(1);
    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().context("--config requires a path")?;
                config_path = Some(std::path::PathBuf::from(value));
            }
            "--help" => {
                println!("Usage: secret-brokerd [--config PATH]");
                std::process::exit(0);
            }
            other => bail!("unknown argument {other}"),
        }
    }
    Ok(config_path)
}

fn build_provider(name: &str) -> Result<Box<dyn SecretProvider>> {
    match name {
        "static" => Ok(Box::new(StaticProvider::new("static"))),
        other => bail!("unknown provider '{other}'"),
    }
}

fn build_channel(name: &str) -> Result<Box<dyn NotificationChannel>> {
    match name {
        "log" => Ok(Box::new(LogChannel::new(name))),
        other => bail!("unknown channel '{other}'"),
    }
}

fn write_pid_file(path: &std::path::Path) {
    if let Err(err) = std::fs::write(path, std::process::id().to_string()) {
        tracing::warn!(error = %err, path = %path.display(), "failed to write pid file");
    }
}
