//! `grpc-discovery` entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Load configuration** from `grpc-discovery.toml`, `GRPC_DISCOVERY_*`
//!    environment variables and command-line flags.
//! 2. **Wire observability**: `tracing-subscriber` with JSON or compact output
//!    and an optional OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: a [`ConsulRegistry`] and a
//!    [`GrpcTransportFactory`], injected into a [`DiscoverySession`].
//! 4. **Acquire** the client, report the discovered endpoints, and keep
//!    following registry changes until interrupted (or exit right away with
//!    `--once`).

mod observability;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use consul::ConsulRegistry;
use discovery::{ClientHandle, RefreshMode};
use grpc::{BalancedTransport, GrpcTransportFactory};
use session::DiscoverySession;
use tracing::{error, info, warn};

use crate::settings::{RefreshKind, Settings, DEFAULT_CONFIG_FILE};

/// Discover a gRPC service through Consul and keep a balanced channel to it.
#[derive(Debug, Parser)]
#[command(name = "grpc-discovery", version, about)]
struct Args {
    /// Configuration file. Defaults to `grpc-discovery.toml` if present.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Registry address, overriding `[registry] address`.
    #[arg(long, value_name = "HOST:PORT")]
    registry_address: Option<String>,

    /// Service to discover, overriding `[discovery] service_name`.
    #[arg(long, value_name = "NAME")]
    service_name: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Exit after the first successful discovery.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;
    let telemetry = observability::init(&settings.observability)?;

    let result = run(settings).await;
    if let Err(e) = &result {
        error!(error = ?e, "grpc-discovery failed");
    }

    telemetry.shutdown();
    result
}

fn load_settings(args: &Args) -> Result<Settings> {
    let path = match &args.config {
        Some(path) => {
            ensure!(path.exists(), "configuration file {} not found", path.display());
            path.clone()
        }
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    };

    let mut settings = Settings::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    if let Some(address) = &args.registry_address {
        settings.registry.address = address.clone();
    }
    if let Some(service) = &args.service_name {
        settings.discovery.service_name = service.clone();
    }
    if args.json_logs {
        settings.observability.json = true;
    }
    if args.once {
        settings.discovery.refresh = RefreshKind::Once;
    }
    Ok(settings)
}

async fn run(settings: Settings) -> Result<()> {
    let config = settings
        .discovery_config()
        .context("invalid discovery configuration")?;
    let registry =
        ConsulRegistry::new(settings.consul_config()).context("failed to create Consul client")?;
    let factory = GrpcTransportFactory::new(settings.grpc_config());
    let session = DiscoverySession::new(config, Arc::new(registry), factory);

    info!(
        session_id = %session.session_id(),
        registry = %session.config().registry_address,
        service = %session.config().service_name,
        "Starting service discovery"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let handle = tokio::select! {
        result = session.acquire() => result.context("service discovery failed")?,
        () = &mut shutdown => {
            info!("Interrupted before discovery completed");
            session.shutdown().await;
            return Ok(());
        }
    };
    report(&handle);

    if matches!(session.config().refresh, RefreshMode::Continuous { .. }) {
        let mut updates = session.subscribe();
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = updates.borrow_and_update().handle().cloned();
                    if let Some(handle) = current {
                        report(&handle);
                    }
                }
                () = &mut shutdown => break,
            }
        }
    }

    session.shutdown().await;
    info!("Shut down");
    Ok(())
}

fn report(handle: &ClientHandle<BalancedTransport>) {
    info!(
        service = %handle.service(),
        instances = handle.instance_count(),
        endpoints = ?handle.transport().active_endpoints(),
        discovered_at = ?handle.discovered_at(),
        "Client ready"
    );
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c; running until the process is killed");
        std::future::pending::<()>().await;
    }
}
