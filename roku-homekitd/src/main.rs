mod accessory;
mod config;
mod controller;
mod device;
mod discovery;
mod ecp;
mod fleet;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use mdns_sd::ServiceDaemon;
use tokio_util::sync::CancellationToken;
use crate::config::{Cli, Config};
use crate::ecp::EcpClient;
use crate::fleet::Fleet;
use crate::transport::IpPublisher;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config
    let config = Config::resolve(Cli::parse()).context("Invalid configuration")?;

    // Initialize tracing
    let filter = if config.debug {
        tracing_subscriber::EnvFilter::new("roku_homekitd=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("roku_homekitd=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting roku-homekitd");
    tracing::debug!("Storage path {:?}", config.storage_path);

    // Find devices on the local network
    tracing::info!("Searching for Rokus...");
    let handles = discovery::discover(discovery::DISCOVERY_TIMEOUT)
        .await
        .context("Device discovery failed")?;
    tracing::info!("Found {} Roku(s)", handles.len());

    let clients: Vec<EcpClient> = handles
        .iter()
        .filter_map(|handle| match EcpClient::new(handle) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::error!("Skipping {}: {}", handle.location, e);
                None
            }
        })
        .collect();

    // Create mDNS daemon shared by all accessories
    let mdns_daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;
    let publisher = IpPublisher::new(mdns_daemon.clone());

    // Build and start one accessory per device
    let cancel = CancellationToken::new();
    let mut fleet = Fleet::assemble(clients, &publisher, &config).await;
    fleet.start(&cancel).await;

    if fleet.is_empty() {
        tracing::warn!("No devices are being bridged");
    }
    for member in fleet.members() {
        tracing::info!("Bridging {:?}", member.accessory().info.name);
    }

    // Wait for shutdown signal
    shutdown_signal().await?;
    tracing::info!("Shutdown signal received");

    // Trigger cancellation and stop every transport
    cancel.cancel();
    fleet.shutdown().await;

    // Shutdown mDNS daemon
    if let Err(e) = mdns_daemon.shutdown() {
        tracing::error!("Failed to shutdown mDNS daemon: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    Ok(())
}
