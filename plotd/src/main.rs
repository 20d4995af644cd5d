//! Plotterd - pen plotter control daemon.
//!
//! Owns the serial link to the motion controller, compiles SVG artwork
//! to G-code, schedules jobs against the machine, and fans progress out
//! to WebSocket clients.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use plot_common::DaemonConfig;
use plotd::events::EventBus;
use plotd::jobs::{JobManager, JobManagerConfig};
use plotd::poller;
use plotd::server::{AppState, create_router};
use plotd::transport::ControllerTransport;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "plotd")]
#[command(author, version, about = "Pen plotter control daemon")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PLOTD_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device override
    #[arg(long, env = "PLOTD_SERIAL")]
    serial: Option<String>,

    /// Run against the simulated controller instead of a device
    #[arg(long)]
    simulate: bool,

    /// Address for the WebSocket/health server
    #[arg(short, long, default_value = "127.0.0.1:8632", env = "PLOTD_BIND")]
    bind: SocketAddr,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Starting plotterd...");

    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => {
            info!("No configuration file given, using defaults");
            DaemonConfig::default()
        }
    };
    if let Some(serial) = &cli.serial {
        config.serial.serial_path = serial.clone();
    }
    if cli.simulate {
        config.serial.dev_mode = true;
    }

    // Singletons, built once and injected everywhere.
    let transport = ControllerTransport::connect(&config.serial);
    if !transport.is_ready() {
        warn!("controller link is not ready; commands will fail until restart");
    }

    let bus = EventBus::new();
    let jobs = JobManager::new(
        Arc::new(transport.clone()),
        bus.clone(),
        JobManagerConfig {
            progress_interval: Duration::from_millis(config.jobs.progress_update_interval_ms),
        },
    );

    let _heartbeat = bus.start_heartbeat(Duration::from_secs(config.bus.heartbeat_interval_secs));
    let _forwarder = jobs.spawn_event_forwarder();
    let _poller = poller::spawn(transport.clone(), jobs.clone(), poller::DEFAULT_POLL_INTERVAL);
    info!("Heartbeat, forwarder, and position poller started");

    let state = AppState {
        bus,
        jobs,
        started_at: Instant::now(),
        version: env!("CARGO_PKG_VERSION"),
        simulation: config.serial.dev_mode,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    info!("Listening on {}", cli.bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Shutdown signal received");
}
