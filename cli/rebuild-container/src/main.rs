//! rebuild-container - destroy and rebuild a container in place
//!
//! Removes the container and creates it again under the same name from its
//! own configuration, host configuration and network endpoints, then starts
//! it. Prints the new container ID on success.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tidewatch_agent::docker::{DockerClient, DockerRuntime};
use tidewatch_agent::Recreator;

mod error;

/// Destroy and rebuild a container from its own configuration.
#[derive(Debug, Parser)]
#[command(name = "rebuild-container")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// ID of the container to rebuild.
    container_id: String,

    /// Docker daemon address (unix:///path/to/docker.sock).
    #[arg(long, env = "DOCKER_HOST")]
    docker_host: Option<String>,

    /// Docker Engine API version to pin requests to (e.g. 1.43).
    #[arg(long, env = "DOCKER_API_VERSION")]
    docker_api_version: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries only the new ID.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match rebuild(&args).await {
        Ok(new_id) => {
            println!("{}", truncate_like(&new_id, &args.container_id));
            Ok(())
        }
        Err(e) => {
            error::print_error(&e);
            std::process::exit(1);
        }
    }
}

async fn rebuild(args: &Args) -> Result<String> {
    let client = DockerClient::from_host(args.docker_host.as_deref())
        .context("Invalid docker host")?
        .with_api_version(args.docker_api_version.clone());
    debug!(
        container = %args.container_id,
        socket = %client.socket_path(),
        "Rebuilding container"
    );
    let recreator = Recreator::new(Arc::new(DockerRuntime::new(client)));

    let recreated = recreator.recreate(&args.container_id).await?;
    Ok(recreated.new_id)
}

/// Shorten `id` to the length of the ID the user typed.
fn truncate_like<'a>(id: &'a str, input: &str) -> &'a str {
    id.get(..input.len()).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_like() {
        let id = "4f2b9c0e7d1a33b8e2c95f1d0a6e7b4c3d2e1f0a9b8c7d6e5f4a3b2c1d0e9f8a";
        assert_eq!(truncate_like(id, "0123456789ab"), "4f2b9c0e7d1a");
        assert_eq!(truncate_like(id, id), id);
        assert_eq!(truncate_like("abc", "0123456789ab"), "abc");
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "rebuild-container",
            "--docker-host",
            "unix:///run/docker.sock",
            "4f2b9c0e7d1a",
        ])
        .unwrap();
        assert_eq!(args.container_id, "4f2b9c0e7d1a");
        assert_eq!(args.docker_host.as_deref(), Some("unix:///run/docker.sock"));

        assert!(Args::try_parse_from(["rebuild-container"]).is_err());
    }
}
