//! fleet-sync - headless fleet status synchronizer
//!
//! Polls the configured source, keeps the canonical fleet up to date and
//! exposes metrics. A failed cycle puts the connection into Error, which
//! needs a manual reconnect; the daemon exits non-zero so a supervisor can
//! restart it.
//!
//! Module structure:
//! - `domain/` - Vehicles, fleet state, source config, errors
//! - `io/` - Source adapters and the Prometheus endpoint
//! - `services/` - Normalizer, Reconciler, Scheduler, Connection, Engine
//! - `infra/` - Config and Metrics

use anyhow::{bail, Context};
use clap::Parser;
use fleet_sync::domain::SourceType;
use fleet_sync::infra::{Config, Metrics};
use fleet_sync::services::{ConnectionState, EngineSettings, FleetEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// fleet-sync - keeps a fleet status board in sync with its source
#[derive(Parser, Debug)]
#[command(name = "fleet-sync", version, about)]
struct Args {
    /// Path to TOML configuration file (default: CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Workbook to upload (overrides source.file for fileUpload sources)
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-cycle detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "fleet-sync starting");

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&[]),
    };

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        source = %config.source_type().as_str(),
        endpoint = %config.source_endpoint(),
        interval_ms = %config.source_interval_ms(),
        seed_vehicles = %config.seed_vehicles(),
        absent_policy = ?config.absent_policy(),
        disconnect_policy = ?config.disconnect_policy(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = fleet_sync::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_server_error");
            }
        });
    }

    // Periodic metrics summary
    let report_metrics = metrics.clone();
    let report_interval = config.metrics_interval_secs().max(1);
    let mut report_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(report_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => report_metrics.report().log(),
                _ = report_shutdown.changed() => break,
            }
        }
    });

    let engine = FleetEngine::new(EngineSettings::from_config(&config), metrics)
        .context("failed to build sync engine")?;

    if config.source_type() == SourceType::FileUpload {
        let path = args.file.as_deref().or(config.source_file());
        match path {
            Some(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("failed to read workbook {}", path.display()))?;
                engine.attach_file(bytes);
            }
            None => warn!("file_upload_without_file"),
        }
    }

    let mut state_rx = engine.subscribe();
    engine
        .connect(config.source_config())
        .await
        .context("initial sync failed")?;

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown_signal_received");
                break Ok(());
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = state_rx.borrow_and_update().clone();
                if let ConnectionState::Error(message) = state {
                    error!(error = %message, "sync_failed_manual_reconnect_required");
                    break Err(message);
                }
            }
        }
    };

    let _ = shutdown_tx.send(true);
    engine.disconnect();
    info!("fleet-sync shutdown complete");

    if let Err(message) = outcome {
        bail!("sync stopped: {}", message);
    }
    Ok(())
}
