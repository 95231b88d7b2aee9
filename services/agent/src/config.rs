//! Configuration for the updater.
//!
//! Flags can also be given through environment variables, which is how the
//! agent is usually configured when it runs as a container itself.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

/// Default time between update checks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Updater behaviour, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Time between cycles in watch mode.
    pub interval: Duration,

    /// Repeat cycles until shutdown instead of running once.
    pub watch: bool,

    /// Abort the run on the first container error.
    pub bail: bool,

    /// Image ID pattern. Accepted but not applied yet.
    pub image_filter: Option<String>,

    /// Pull every tag of an image's repository, not only the referenced tag.
    pub pull_all_tags: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            watch: false,
            bail: false,
            image_filter: None,
            pull_all_tags: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// tidewatch - keep running containers on their latest image.
#[derive(Debug, Parser)]
#[command(name = "tidewatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Duration between checks (e.g. 30s, 5m, 1h).
    #[arg(long, env = "TIDEWATCH_INTERVAL", default_value = "1m", value_parser = humantime::parse_duration)]
    pub interval: Duration,

    /// Keep checking on the interval (if false, only checks once).
    #[arg(long, env = "TIDEWATCH_WATCH")]
    pub watch: bool,

    /// Exit as soon as an error occurs.
    #[arg(long, env = "TIDEWATCH_BAIL")]
    pub bail: bool,

    /// Regular expression to match image IDs (reserved, not applied yet).
    #[arg(long = "image-ids", env = "TIDEWATCH_IMAGE_IDS")]
    pub image_ids: Option<String>,

    /// Pull all tags of an image's repository.
    #[arg(
        long,
        env = "TIDEWATCH_PULL_ALL_TAGS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub pull_all_tags: bool,

    /// Docker daemon address (unix:///path/to/docker.sock).
    #[arg(long, env = "DOCKER_HOST")]
    pub docker_host: Option<String>,

    /// Docker Engine API version to pin requests to (e.g. 1.43).
    #[arg(long, env = "DOCKER_API_VERSION")]
    pub docker_api_version: Option<String>,

    /// Directory holding the docker client config.json with registry credentials.
    #[arg(long, env = "DOCKER_CONFIG")]
    pub docker_config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, env = "TIDEWATCH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Updater configuration from the parsed flags.
    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            interval: self.interval,
            watch: self.watch,
            bail: self.bail,
            image_filter: self.image_ids.clone().filter(|f| !f.is_empty()),
            pull_all_tags: self.pull_all_tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["tidewatch"]).unwrap();
        let config = cli.updater_config();

        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert!(!config.watch);
        assert!(!config.bail);
        assert!(config.pull_all_tags);
        assert!(config.image_filter.is_none());
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "tidewatch",
            "--interval",
            "5m",
            "--watch",
            "--bail",
            "--pull-all-tags",
            "false",
            "--image-ids",
            "^sha256:ab",
            "--log-format",
            "json",
        ])
        .unwrap();
        let config = cli.updater_config();

        assert_eq!(config.interval, Duration::from_secs(300));
        assert!(config.watch);
        assert!(config.bail);
        assert!(!config.pull_all_tags);
        assert_eq!(config.image_filter.as_deref(), Some("^sha256:ab"));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_interval() {
        assert!(Cli::try_parse_from(["tidewatch", "--interval", "soon"]).is_err());
    }
}
