//! Docker Engine HTTP API client.
//!
//! This module provides an HTTP client for the engine's unix socket API,
//! covering the container and image endpoints the updater uses.
//!
//! Reference: https://docs.docker.com/engine/api/latest/

use std::path::Path;

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use hyper::{body::Buf, Body, Client, Method, Request, Response};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use super::stream::split_lines;
use crate::runtime::RemoveOptions;

use super::types::{
    ContainerInspectResponse, ContainerSummaryResponse, CreateContainerResponse, ErrorResponse,
    ImageInspectResponse,
};

/// Header carrying the encoded registry credentials on pulls.
const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// Default engine socket.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Errors from the Docker Engine API.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Socket not found: {0}")]
    SocketNotFound(String),

    #[error("Unsupported docker host: {0}")]
    UnsupportedHost(String),
}

/// Docker Engine API client for unix socket communication.
pub struct DockerClient {
    socket_path: String,
    api_version: Option<String>,
    client: Client<UnixConnector>,
}

impl DockerClient {
    /// Create a new client for the given socket path.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        let client = Client::unix();
        Self {
            socket_path,
            api_version: None,
            client,
        }
    }

    /// Create a client from a `DOCKER_HOST` style address.
    ///
    /// Only `unix://` hosts are supported; `None` selects [`DEFAULT_SOCKET`].
    pub fn from_host(host: Option<&str>) -> Result<Self, DockerError> {
        match host.map(str::trim).filter(|h| !h.is_empty()) {
            None => Ok(Self::new(DEFAULT_SOCKET)),
            Some(host) => match host.strip_prefix("unix://") {
                Some(path) if !path.is_empty() => Ok(Self::new(path)),
                _ => Err(DockerError::UnsupportedHost(host.to_string())),
            },
        }
    }

    /// Pin requests to an API version such as `1.43`.
    pub fn with_api_version(mut self, version: Option<String>) -> Self {
        self.api_version = version.map(|v| v.trim_start_matches('v').to_string());
        self
    }

    /// Path of the engine socket.
    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Check if the socket exists.
    pub fn socket_exists(&self) -> bool {
        Path::new(&self.socket_path).exists()
    }

    /// List running containers.
    pub async fn list_containers(&self) -> Result<Vec<ContainerSummaryResponse>, DockerError> {
        self.get("/containers/json").await
    }

    /// Inspect a container.
    pub async fn inspect_container(&self, id: &str) -> Result<ContainerInspectResponse, DockerError> {
        self.get(&format!("/containers/{}/json", urlencoding::encode(id)))
            .await
    }

    /// Inspect an image by ID or reference.
    pub async fn inspect_image(&self, name: &str) -> Result<ImageInspectResponse, DockerError> {
        // Image names keep their slashes; the engine routes on the full remainder.
        self.get(&format!("/images/{}/json", name)).await
    }

    /// Pull an image, returning its progress events one line at a time.
    ///
    /// Without `tag`, the engine pulls every tag of `from_image`.
    pub async fn pull_image(
        &self,
        from_image: &str,
        tag: Option<&str>,
        registry_auth: Option<&str>,
    ) -> Result<BoxStream<'static, Result<Bytes, DockerError>>, DockerError> {
        let request = self.pull_request(from_image, tag, registry_auth)?;
        let response = self.send(request).await?;
        let body = response.into_body().map_err(DockerError::Http);
        Ok(split_lines(body).boxed())
    }

    fn pull_request(
        &self,
        from_image: &str,
        tag: Option<&str>,
        registry_auth: Option<&str>,
    ) -> Result<Request<Body>, DockerError> {
        let mut request = self.request(Method::POST, &pull_path(from_image, tag));
        if let Some(auth) = registry_auth {
            request = request.header(REGISTRY_AUTH_HEADER, auth);
        }
        Ok(request.body(Body::empty())?)
    }

    /// Remove a container.
    pub async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), DockerError> {
        let request = self
            .request(Method::DELETE, &remove_path(id, options))
            .body(Body::empty())?;
        self.send(request).await?;
        Ok(())
    }

    /// Create a container from a full create body.
    pub async fn create_container(
        &self,
        name: &str,
        body: &Value,
    ) -> Result<CreateContainerResponse, DockerError> {
        let path = format!("/containers/create?name={}", urlencoding::encode(name));
        let request = self
            .request(Method::POST, &path)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(body)?))?;

        let response = self.send(request).await?;
        let body = hyper::body::aggregate(response.into_body()).await?;
        Ok(serde_json::from_reader(body.reader())?)
    }

    /// Start a container.
    pub async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        let path = format!("/containers/{}/start", urlencoding::encode(id));
        let request = self.request(Method::POST, &path).body(Body::empty())?;
        self.send(request).await?;
        Ok(())
    }

    /// Full request path including the API version prefix.
    fn versioned(&self, path: &str) -> String {
        match &self.api_version {
            Some(version) => format!("/v{version}{path}"),
            None => path.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> hyper::http::request::Builder {
        let uri: hyper::Uri = Uri::new(&self.socket_path, &self.versioned(path)).into();
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Accept", "application/json")
    }

    /// Perform a GET request.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, DockerError> {
        let request = self.request(Method::GET, path).body(Body::empty())?;
        let response = self.send(request).await?;
        let body = hyper::body::aggregate(response.into_body()).await?;
        Ok(serde_json::from_reader(body.reader())?)
    }

    /// Send a request, turning non-success statuses into [`DockerError::Api`].
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, DockerError> {
        debug!(method = %request.method(), uri = %request.uri(), "Docker API request");

        if !self.socket_exists() {
            return Err(DockerError::SocketNotFound(self.socket_path.clone()));
        }

        let response = self.client.request(request).await?;
        let status = response.status();

        if status.is_success() || status == hyper::StatusCode::NOT_MODIFIED {
            return Ok(response);
        }

        let message = error_message(response.into_body()).await?;
        error!(status = %status, message = %message, "Docker API error");
        Err(DockerError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// `POST /images/create` path. Without a tag the engine pulls all tags.
fn pull_path(from_image: &str, tag: Option<&str>) -> String {
    let mut path = format!("/images/create?fromImage={}", urlencoding::encode(from_image));
    if let Some(tag) = tag {
        path.push_str("&tag=");
        path.push_str(&urlencoding::encode(tag));
    }
    path
}

/// `DELETE /containers/{id}` path.
fn remove_path(id: &str, options: RemoveOptions) -> String {
    format!(
        "/containers/{}?force={}&v={}&link={}",
        urlencoding::encode(id),
        options.force,
        options.remove_volumes,
        options.remove_links
    )
}

/// Read a whole error response body and extract its message.
async fn error_message(body: Body) -> Result<String, DockerError> {
    let body = hyper::body::to_bytes(body).await?;
    Ok(api_message(&body))
}

/// Extract the engine's error message from a response body.
fn api_message(body: &[u8]) -> String {
    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(err) => err.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    }
}

impl From<hyper::http::Error> for DockerError {
    fn from(err: hyper::http::Error) -> Self {
        DockerError::Api {
            status: 0,
            message: err.to_string(),
        }
    }
}
