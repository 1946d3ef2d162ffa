//! `ws-node` — Meshtastic mesh node on a Waveshare USB LoRa dongle.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wslora_node::apps::{
    NodeInfoApplication, PositionApplication, TelemetryApplication, TextApplication,
};
use wslora_node::config::NodeConfig;
use wslora_node::{Node, Result};

#[derive(Debug, Parser)]
#[command(name = "ws-node", version, about = "Waveshare USB LoRa Meshtastic node")]
struct Cli {
    /// Serial port of the LoRa dongle.
    #[arg(short = 'p', long = "port")]
    port: String,

    /// Node configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Log level: debug, info, or error.
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "node failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = NodeConfig::load(&cli.config)?;

    let mut node = Node::new(&cli.port, config.clone())?;

    node.add_application(Arc::new(TextApplication::new(&config.nats_subject_prefix)));
    if let Some(ref settings) = config.node_info {
        node.add_application(Arc::new(NodeInfoApplication::new(&config, settings)));
    }
    if let Some(ref settings) = config.position {
        node.add_application(Arc::new(PositionApplication::new(&config, settings)));
    }
    if let Some(ref telemetry) = config.telemetry {
        if let Some(ref settings) = telemetry.device_metrics {
            node.add_application(Arc::new(TelemetryApplication::new(&config, settings)));
        }
    }

    node.start().await?;
    info!(
        node_id = %config.id,
        port = %cli.port,
        "node started"
    );

    shutdown_signal().await;
    info!("shutting down");

    node.stop().await
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
