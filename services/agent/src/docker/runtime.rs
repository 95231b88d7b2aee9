//! [`ContainerRuntime`] backed by the Docker Engine.

use async_trait::async_trait;
use futures_util::stream::{StreamExt, TryStreamExt};
use tracing::warn;

use super::api::{DockerClient, DockerError};
use super::types::create_body;
use crate::resolve::split_tag;
use crate::runtime::{
    ContainerDetails, ContainerRuntime, ContainerSummary, CreateContainer, EventLines,
    ImageDetails, PullRequest, RemoveOptions, RuntimeError,
};

/// Tag the engine assumes when a reference names none.
const DEFAULT_TAG: &str = "latest";

/// Docker Engine runtime.
pub struct DockerRuntime {
    client: DockerClient,
}

impl DockerRuntime {
    /// Create a runtime over an engine client.
    pub fn new(client: DockerClient) -> Self {
        Self { client }
    }
}

/// Image name and tag to ask the engine for.
///
/// Pulling all tags sends no tag. Otherwise the reference's own tag is used,
/// or `latest` when it has none.
fn pull_target(request: &PullRequest) -> (&str, Option<&str>) {
    let (name, tag) = split_tag(&request.reference);
    match (request.all_tags, tag) {
        (true, _) => (name, None),
        (false, Some(tag)) => (name, Some(tag)),
        (false, None) => (name, Some(DEFAULT_TAG)),
    }
}

impl From<DockerError> for RuntimeError {
    fn from(err: DockerError) -> Self {
        match err {
            DockerError::Http(e) => RuntimeError::Unreachable(e.to_string()),
            DockerError::SocketNotFound(path) => {
                RuntimeError::Unreachable(format!("socket not found: {path}"))
            }
            DockerError::UnsupportedHost(host) => {
                RuntimeError::Unreachable(format!("unsupported docker host: {host}"))
            }
            DockerError::Json(e) => RuntimeError::Decode(e.to_string()),
            DockerError::Api { status: 404, message } => RuntimeError::NotFound(message),
            DockerError::Api { status, message } => RuntimeError::Api { status, message },
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let containers = self.client.list_containers().await?;
        Ok(containers.into_iter().map(Into::into).collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        Ok(self.client.inspect_container(id).await?.into())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails, RuntimeError> {
        Ok(self.client.inspect_image(reference).await?.into())
    }

    async fn pull_image(&self, request: &PullRequest) -> Result<EventLines, RuntimeError> {
        let (name, tag) = pull_target(request);
        let lines = self
            .client
            .pull_image(name, tag, request.auth.as_deref())
            .await?;
        Ok(lines.map_err(RuntimeError::from).boxed())
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), RuntimeError> {
        self.client
            .remove_container(id, options)
            .await?;
        Ok(())
    }

    async fn create_container(&self, spec: &CreateContainer) -> Result<String, RuntimeError> {
        let response = self
            .client
            .create_container(&spec.name, &create_body(spec))
            .await?;

        for warning in response.warnings.unwrap_or_default() {
            warn!(container = %spec.name, warning = %warning, "Engine warning on create");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.client.start_container(id).await?;
        Ok(())
    }
}
