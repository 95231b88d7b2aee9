//! tidewatch
//!
//! Checks running containers for newer images and recreates the ones whose
//! image was updated, once or on an interval.
//!
//! ## Architecture
//!
//! - **Scheduler**: Runs one cycle, or repeats on the interval in watch mode
//! - **Updater**: Resolves, pulls and compares images, recreates containers
//! - **Runtime**: Docker Engine over its unix socket

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tidewatch_agent::config::{Cli, LogFormat};
use tidewatch_agent::docker::{DockerClient, DockerRuntime};
use tidewatch_agent::runtime::ContainerRuntime;
use tidewatch_agent::{scheduler, Updater};
use tidewatch_registry_auth::CredentialMap;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!("Starting tidewatch");

    let config = cli.updater_config();
    if let Some(filter) = &config.image_filter {
        warn!(filter = %filter, "Image ID filter is not applied yet");
    }

    let client = DockerClient::from_host(cli.docker_host.as_deref())
        .context("Invalid docker host")?
        .with_api_version(cli.docker_api_version.clone());
    info!(socket = %client.socket_path(), "Using Docker Engine");
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new(client));

    let credentials_path = CredentialMap::default_path(cli.docker_config.as_deref())?;
    let credentials = CredentialMap::load(&credentials_path)
        .with_context(|| format!("Failed to load registry credentials from {:?}", credentials_path))?;
    info!(
        path = %credentials_path.display(),
        registries = credentials.len(),
        "Registry credentials loaded"
    );

    let updater = Updater::new(runtime, Arc::new(credentials), config);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(e) = scheduler::run(&updater, shutdown_rx).await {
        error!(error = %e, "Update run aborted");
        std::process::exit(1);
    }

    info!("tidewatch finished");
    Ok(())
}
