//! Container runtime interface and mock implementation.
//!
//! The runtime interface abstracts the image and container primitives the
//! updater needs:
//! - Listing and inspecting containers
//! - Inspecting and pulling images
//! - Removing, creating and starting containers
//!
//! A mock implementation is provided for testing and development.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Label set by compose on every container it manages.
pub const COMPOSE_CONFIG_HASH_LABEL: &str = "com.docker.compose.config-hash";

/// Container state reported for running containers.
pub const STATE_RUNNING: &str = "running";

/// Errors from the container runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("container runtime unreachable: {0}")]
    Unreachable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("runtime API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid runtime response: {0}")]
    Decode(String),
}

/// A container as reported by the runtime's listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Container ID.
    pub id: String,

    /// Display names, each with a leading `/`.
    pub names: Vec<String>,

    /// Image as the container was created with: a tag or a `sha256:` ID.
    pub image: String,

    /// ID of the image the container was started from.
    pub image_id: String,

    /// Runtime state (`running`, `exited`, ...).
    pub state: String,

    /// Container labels.
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    /// Returns true if the container is running.
    pub fn is_running(&self) -> bool {
        self.state == STATE_RUNNING
    }

    /// Returns true if compose owns this container's lifecycle.
    pub fn is_compose_managed(&self) -> bool {
        self.labels.contains_key(COMPOSE_CONFIG_HASH_LABEL)
    }

    /// First display name without its leading `/`, or the short ID.
    pub fn display_name(&self) -> &str {
        match self.names.first() {
            Some(name) => name.trim_start_matches('/'),
            None => short_id(&self.id),
        }
    }
}

/// Full description of a container, enough to create an identical one.
///
/// Configuration sections are kept as raw JSON so that every field the
/// runtime reports survives a recreation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerDetails {
    /// Container ID.
    pub id: String,

    /// Container name, possibly with a leading `/`.
    pub name: String,

    /// ID of the image the container was started from.
    pub image_id: String,

    /// Container configuration.
    pub config: Value,

    /// Host configuration.
    pub host_config: Value,

    /// Endpoint settings keyed by network name.
    pub endpoints: Map<String, Value>,
}

/// Image metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDetails {
    /// Content-addressed image ID (`sha256:...`).
    pub id: String,

    /// Tag-qualified names pointing at this image.
    pub repo_tags: Vec<String>,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateContainer {
    /// Name for the new container, without a leading `/`.
    pub name: String,

    /// Container configuration.
    pub config: Value,

    /// Host configuration.
    pub host_config: Value,

    /// Endpoint settings keyed by network name.
    pub endpoints: Map<String, Value>,
}

/// Options for removing a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill the container if it is running.
    pub force: bool,

    /// Remove anonymous volumes attached to the container.
    pub remove_volumes: bool,

    /// Remove links instead of the container.
    pub remove_links: bool,
}

/// An image pull to request from the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// Canonical image reference.
    pub reference: String,

    /// Pull every tag of the repository rather than just the referenced one.
    pub all_tags: bool,

    /// Opaque registry authorization token.
    pub auth: Option<String>,
}

/// Raw progress events of a pull, one JSON document per line.
pub type EventLines = BoxStream<'static, Result<Bytes, RuntimeError>>;

/// Container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers with their state and labels.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Describe a container in full.
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError>;

    /// Describe an image by ID or reference.
    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails, RuntimeError>;

    /// Start pulling an image; the returned stream yields its progress events.
    async fn pull_image(&self, request: &PullRequest) -> Result<EventLines, RuntimeError>;

    /// Remove a container.
    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), RuntimeError>;

    /// Create a container, returning its ID.
    async fn create_container(&self, spec: &CreateContainer) -> Result<String, RuntimeError>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;
}

/// Shorten a container or image ID for display.
pub fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.get(..12).unwrap_or(id)
}

// =============================================================================
// Mock runtime
// =============================================================================

/// Runtime operations that can be made to fail in [`MockRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    List,
    InspectContainer,
    InspectImage,
    Pull,
    Remove,
    Create,
    Start,
}

/// A container known to [`MockRuntime`].
#[derive(Debug, Clone)]
pub struct MockContainer {
    summary: ContainerSummary,
    details: ContainerDetails,
}

impl MockContainer {
    /// A running container created from `image`, started from `image_id`.
    pub fn new(id: &str, name: &str, image: &str, image_id: &str) -> Self {
        Self {
            summary: ContainerSummary {
                id: id.to_string(),
                names: vec![format!("/{name}")],
                image: image.to_string(),
                image_id: image_id.to_string(),
                state: STATE_RUNNING.to_string(),
                labels: HashMap::new(),
            },
            details: ContainerDetails {
                id: id.to_string(),
                name: format!("/{name}"),
                image_id: image_id.to_string(),
                config: serde_json::json!({ "Image": image }),
                host_config: serde_json::json!({}),
                endpoints: Map::new(),
            },
        }
    }

    /// Set a label.
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.summary
            .labels
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Set the runtime state.
    pub fn state(mut self, state: &str) -> Self {
        self.summary.state = state.to_string();
        self
    }

    /// Replace the container configuration.
    pub fn config(mut self, config: Value) -> Self {
        self.details.config = config;
        self
    }

    /// Replace the host configuration.
    pub fn host_config(mut self, host_config: Value) -> Self {
        self.details.host_config = host_config;
        self
    }

    /// Attach the container to a network.
    pub fn network(mut self, name: &str, endpoint: Value) -> Self {
        self.details.endpoints.insert(name.to_string(), endpoint);
        self
    }
}

/// A scripted pull.
#[derive(Debug, Clone)]
struct MockPull {
    lines: Vec<Result<Bytes, RuntimeError>>,
    image: Option<ImageDetails>,
}

#[derive(Debug, Default)]
struct MockState {
    containers: Vec<MockContainer>,
    images: HashMap<String, ImageDetails>,
    pulls: HashMap<String, MockPull>,
    failures: HashMap<MockOp, RuntimeError>,
    pull_requests: Vec<PullRequest>,
    removed: Vec<(String, RemoveOptions)>,
    created: Vec<CreateContainer>,
    started: Vec<String>,
    next_id: u64,
}

/// In-memory runtime for testing and development.
///
/// Pulls are scripted per reference with [`MockRuntime::with_pull`]; once a
/// pull request succeeds, the scripted image becomes visible to
/// `inspect_image` under that reference.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    /// Create an empty mock runtime.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a container.
    pub fn with_container(self, container: MockContainer) -> Self {
        self.state().containers.push(container);
        self
    }

    /// Make an image inspectable under `reference`.
    pub fn with_image(self, reference: &str, image: ImageDetails) -> Self {
        self.state().images.insert(reference.to_string(), image);
        self
    }

    /// Script the pull of `reference`: the event lines it streams and the
    /// image the reference points at afterwards.
    pub fn with_pull(self, reference: &str, lines: &[&str], image_id: &str) -> Self {
        let pull = MockPull {
            lines: lines
                .iter()
                .map(|line| Ok(Bytes::copy_from_slice(line.as_bytes())))
                .collect(),
            image: Some(ImageDetails {
                id: image_id.to_string(),
                repo_tags: vec![reference.to_string()],
            }),
        };
        self.state().pulls.insert(reference.to_string(), pull);
        self
    }

    /// Script a pull whose stream breaks after `lines` with `error`.
    pub fn with_broken_pull(self, reference: &str, lines: &[&str], error: RuntimeError) -> Self {
        let mut events: Vec<_> = lines
            .iter()
            .map(|line| Ok(Bytes::copy_from_slice(line.as_bytes())))
            .collect();
        events.push(Err(error));
        self.state().pulls.insert(
            reference.to_string(),
            MockPull {
                lines: events,
                image: None,
            },
        );
        self
    }

    /// Make every call to `op` fail with `error`.
    pub fn fail(self, op: MockOp, error: RuntimeError) -> Self {
        self.state().failures.insert(op, error);
        self
    }

    fn check(&self, op: MockOp) -> Result<(), RuntimeError> {
        match self.state().failures.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Pull requests received so far.
    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.state().pull_requests.clone()
    }

    /// Number of pull requests received so far.
    pub fn pull_count(&self) -> usize {
        self.state().pull_requests.len()
    }

    /// Removed container IDs with the options used.
    pub fn removed(&self) -> Vec<(String, RemoveOptions)> {
        self.state().removed.clone()
    }

    /// Create requests received so far.
    pub fn created(&self) -> Vec<CreateContainer> {
        self.state().created.clone()
    }

    /// Started container IDs.
    pub fn started(&self) -> Vec<String> {
        self.state().started.clone()
    }

    /// Current containers.
    pub fn containers(&self) -> Vec<ContainerSummary> {
        self.state()
            .containers
            .iter()
            .map(|c| c.summary.clone())
            .collect()
    }

    /// Current details of the container named `name`.
    pub fn container_named(&self, name: &str) -> Option<ContainerDetails> {
        self.state()
            .containers
            .iter()
            .find(|c| c.summary.display_name() == name)
            .map(|c| c.details.clone())
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.check(MockOp::List)?;
        Ok(self.containers())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        self.check(MockOp::InspectContainer)?;
        self.state()
            .containers
            .iter()
            .find(|c| c.summary.id == id)
            .map(|c| c.details.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails, RuntimeError> {
        self.check(MockOp::InspectImage)?;
        self.state()
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("no such image: {reference}")))
    }

    async fn pull_image(&self, request: &PullRequest) -> Result<EventLines, RuntimeError> {
        self.check(MockOp::Pull)?;

        let mut state = self.state();
        state.pull_requests.push(request.clone());

        let pull = state
            .pulls
            .get(&request.reference)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("no such image: {}", request.reference)))?;

        if let Some(image) = pull.image {
            state.images.insert(request.reference.clone(), image);
        }

        debug!(reference = %request.reference, "[MOCK] Pulling image");
        Ok(stream::iter(pull.lines).boxed())
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), RuntimeError> {
        self.check(MockOp::Remove)?;

        let mut state = self.state();
        let before = state.containers.len();
        state.containers.retain(|c| c.summary.id != id);
        if state.containers.len() == before {
            return Err(RuntimeError::NotFound(format!("no such container: {id}")));
        }
        state.removed.push((id.to_string(), options));
        Ok(())
    }

    async fn create_container(&self, spec: &CreateContainer) -> Result<String, RuntimeError> {
        self.check(MockOp::Create)?;

        let mut state = self.state();
        if state
            .containers
            .iter()
            .any(|c| c.summary.display_name() == spec.name)
        {
            return Err(RuntimeError::Api {
                status: 409,
                message: format!("container name \"/{}\" is already in use", spec.name),
            });
        }

        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        let image = spec
            .config
            .get("Image")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let image_id = state
            .images
            .get(&image)
            .map(|i| i.id.clone())
            .unwrap_or_default();

        let mut container = MockContainer::new(&id, &spec.name, &image, &image_id)
            .state("created")
            .config(spec.config.clone())
            .host_config(spec.host_config.clone());
        container.details.endpoints = spec.endpoints.clone();

        state.containers.push(container);
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.check(MockOp::Start)?;

        let mut state = self.state();
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.summary.id == id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        container.summary.state = STATE_RUNNING.to_string();
        state.started.push(id.to_string());
        Ok(())
    }
}
