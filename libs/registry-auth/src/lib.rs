//! Registry credentials for image pulls.
//!
//! Credentials are read once from the docker client configuration
//! (`$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`).
//! Every `auths` entry is converted into the value the engine expects in the
//! `X-Registry-Auth` header. Consumers only ever see that value as an opaque
//! token looked up by registry name.
//!
//! # Registry names
//!
//! Keys in the config file come in several shapes (`https://index.docker.io/v1/`,
//! `ghcr.io`, `registry.example.com:5000`). Lookups normalise both sides by
//! dropping the scheme and any `/v1/` suffix, and treat every Docker Hub alias
//! as the same registry.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the docker client configuration file.
pub const CONFIG_FILE: &str = "config.json";

/// Canonical key used for Docker Hub.
pub const DOCKER_HUB: &str = "docker.io";

/// Names under which Docker Hub shows up in configs and image references.
const DOCKER_HUB_ALIASES: &[&str] = &[
    "docker.io",
    "index.docker.io",
    "registry-1.docker.io",
    "hub.docker.com",
];

/// Errors from loading registry credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not determine home directory")]
    NoHomeDir,
}

/// Lookup capability for per-registry authorization tokens.
pub trait CredentialProvider: Send + Sync {
    /// Token for `registry`, if one is configured.
    fn token_for(&self, registry: &str) -> Option<String>;
}

/// On-disk docker client config; only the parts we read.
#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,

    #[serde(default, rename = "identitytoken")]
    identity_token: Option<String>,
}

/// Body of the `X-Registry-Auth` header.
#[derive(Debug, Serialize)]
struct EngineAuth<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,

    #[serde(rename = "identitytoken", skip_serializing_if = "Option::is_none")]
    identity_token: Option<&'a str>,

    serveraddress: &'a str,
}

/// Registry name to engine token, read-only after loading.
#[derive(Debug, Clone, Default)]
pub struct CredentialMap {
    tokens: HashMap<String, String>,
}

impl CredentialMap {
    /// A map with no credentials.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve the config file location.
    ///
    /// `config_dir` mirrors `DOCKER_CONFIG`: a directory holding `config.json`.
    pub fn default_path(config_dir: Option<&Path>) -> Result<PathBuf, CredentialError> {
        if let Some(dir) = config_dir {
            return Ok(dir.join(CONFIG_FILE));
        }

        BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".docker").join(CONFIG_FILE))
            .ok_or(CredentialError::NoHomeDir)
    }

    /// Load credentials from a docker client config file.
    ///
    /// A missing file yields an empty map.
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No docker client config, using no credentials");
                return Ok(Self::empty());
            }
            Err(source) => {
                return Err(CredentialError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: DockerConfigFile =
            serde_json::from_str(&contents).map_err(|source| CredentialError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut map = Self::empty();
        for (registry, entry) in &config.auths {
            if let Some(token) = engine_token(registry, entry) {
                map.insert(registry, token);
            }
        }

        debug!(
            path = %path.display(),
            registries = map.len(),
            "Loaded registry credentials"
        );
        Ok(map)
    }

    /// Add or replace the token for a registry.
    pub fn insert(&mut self, registry: &str, token: impl Into<String>) {
        self.tokens
            .insert(normalize_registry(registry), token.into());
    }

    /// Number of registries with credentials.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if no credentials are configured.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl CredentialProvider for CredentialMap {
    fn token_for(&self, registry: &str) -> Option<String> {
        self.tokens.get(&normalize_registry(registry)).cloned()
    }
}

/// Normalise a registry name or config key for lookup.
///
/// Strips the URL scheme and trailing path (`https://index.docker.io/v1/`
/// becomes `index.docker.io`) and folds Docker Hub aliases to [`DOCKER_HUB`].
pub fn normalize_registry(registry: &str) -> String {
    let trimmed = registry
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = trimmed.split('/').next().unwrap_or(trimmed);

    if DOCKER_HUB_ALIASES.contains(&host) {
        DOCKER_HUB.to_string()
    } else {
        host.to_string()
    }
}

/// Build the engine token for one config entry.
fn engine_token(registry: &str, entry: &AuthEntry) -> Option<String> {
    let server = registry.trim();

    if let Some(identity_token) = entry.identity_token.as_deref().filter(|t| !t.is_empty()) {
        return Some(encode(&EngineAuth {
            username: None,
            password: None,
            identity_token: Some(identity_token),
            serveraddress: server,
        }));
    }

    let auth = entry.auth.as_deref().filter(|a| !a.is_empty())?;

    let decoded = STANDARD
        .decode(auth)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());

    match decoded.as_deref().and_then(|d| d.split_once(':')) {
        Some((username, password)) => Some(encode(&EngineAuth {
            username: Some(username),
            password: Some(password),
            identity_token: None,
            serveraddress: server,
        })),
        None => {
            warn!(
                registry = %registry,
                "Credential entry is not base64 user:password, passing it through unchanged"
            );
            Some(auth.to_string())
        }
    }
}

fn encode(auth: &EngineAuth<'_>) -> String {
    // Serializing a struct of strings cannot fail.
    let json = serde_json::to_vec(auth).unwrap_or_default();
    URL_SAFE.encode(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn decode_token(token: &str) -> serde_json::Value {
        let bytes = URL_SAFE.decode(token).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join(CONFIG_FILE);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[rstest]
    #[case("https://index.docker.io/v1/", "docker.io")]
    #[case("docker.io", "docker.io")]
    #[case("hub.docker.com", "docker.io")]
    #[case("registry-1.docker.io", "docker.io")]
    #[case("ghcr.io", "ghcr.io")]
    #[case("https://registry.example.com:5000", "registry.example.com:5000")]
    fn test_normalize_registry(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_registry(input), expected);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = CredentialMap::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "{ not json");
        let err = CredentialMap::load(&path).unwrap_err();
        assert!(matches!(err, CredentialError::Parse { .. }));
    }

    #[test]
    fn test_basic_auth_becomes_engine_token() {
        let dir = tempfile::tempdir().unwrap();
        // "alice:s3cret"
        let path = write_config(
            &dir,
            r#"{"auths": {"https://index.docker.io/v1/": {"auth": "YWxpY2U6czNjcmV0"}}}"#,
        );

        let map = CredentialMap::load(&path).unwrap();
        assert_eq!(map.len(), 1);

        let token = map.token_for("hub.docker.com").unwrap();
        let body = decode_token(&token);
        assert_eq!(body["username"], "alice");
        assert_eq!(body["password"], "s3cret");
        assert_eq!(body["serveraddress"], "https://index.docker.io/v1/");
    }

    #[test]
    fn test_identity_token_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{"auths": {"ghcr.io": {"auth": "YWxpY2U6czNjcmV0", "identitytoken": "tok"}}}"#,
        );

        let map = CredentialMap::load(&path).unwrap();
        let body = decode_token(&map.token_for("ghcr.io").unwrap());
        assert_eq!(body["identitytoken"], "tok");
        assert!(body.get("username").is_none());
    }

    #[test]
    fn test_undecodable_auth_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, r#"{"auths": {"quay.io": {"auth": "opaque-value"}}}"#);

        let map = CredentialMap::load(&path).unwrap();
        assert_eq!(map.token_for("quay.io").as_deref(), Some("opaque-value"));
    }

    #[test]
    fn test_entries_without_auth_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, r#"{"auths": {"quay.io": {}}, "credsStore": "desktop"}"#);

        let map = CredentialMap::load(&path).unwrap();
        assert!(map.is_empty());
        assert!(map.token_for("quay.io").is_none());
    }

    #[test]
    fn test_default_path_prefers_config_dir() {
        let path = CredentialMap::default_path(Some(Path::new("/etc/docker-client"))).unwrap();
        assert_eq!(path, PathBuf::from("/etc/docker-client/config.json"));
    }
}
