//! Destroy and rebuild a container in place.
//!
//! The container is inspected, force-removed together with its anonymous
//! volumes (links are kept), created again from the captured configuration,
//! host configuration and network endpoints under the same name, and started.
//!
//! The sequence is not atomic. If create or start fails after the removal,
//! the original container is gone and nothing replaces it; the error says
//! which step failed so the caller can report it.
//!
//! A container created from an image ID has that ID as its configured
//! image. The replacement is created from the same ID and so keeps running
//! the old image; a warning is logged when this happens.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::UpdateError;
use crate::resolve::DIGEST_PREFIX;
use crate::runtime::{short_id, ContainerRuntime, CreateContainer, RemoveOptions, RuntimeError};

/// Removal used when replacing a container.
const REPLACE: RemoveOptions = RemoveOptions {
    force: true,
    remove_volumes: true,
    remove_links: false,
};

/// Step of a recreation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateStep {
    Remove,
    Create,
    Start,
}

impl fmt::Display for RecreateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Self::Remove => "remove",
            Self::Create => "create",
            Self::Start => "start",
        };
        f.write_str(step)
    }
}

/// A recreation step failed.
#[derive(Debug, Error)]
#[error("failed to {step} container {container}: {source}")]
pub struct RecreateError {
    /// Step that failed.
    pub step: RecreateStep,

    /// Container name.
    pub container: String,

    #[source]
    pub source: RuntimeError,
}

impl RecreateError {
    /// Returns true if the original container no longer exists.
    pub fn original_removed(&self) -> bool {
        self.step != RecreateStep::Remove
    }
}

/// A successful recreation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recreated {
    /// Container name, shared by old and new container.
    pub name: String,

    /// ID of the removed container.
    pub old_id: String,

    /// ID of the started replacement.
    pub new_id: String,
}

/// Recreates containers through a runtime.
pub struct Recreator {
    runtime: Arc<dyn ContainerRuntime>,
}

impl Recreator {
    /// Create a new recreator.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Replace a container with a fresh one built from the same configuration.
    pub async fn recreate(&self, container_id: &str) -> Result<Recreated, UpdateError> {
        let details = self
            .runtime
            .inspect_container(container_id)
            .await
            .map_err(|source| UpdateError::Inspection {
                target: format!("container {container_id}"),
                source,
            })?;

        let name = details.name.trim_start_matches('/').to_string();
        let step_error = |step, source| RecreateError {
            step,
            container: name.clone(),
            source,
        };

        debug!(
            container = %name,
            id = %short_id(&details.id),
            image_id = %short_id(&details.image_id),
            networks = details.endpoints.len(),
            "Captured container configuration"
        );

        if let Some(image) = pinned_image(&details.config) {
            warn!(
                container = %name,
                image = %short_id(image),
                "Container is configured with an image ID, replacement keeps the same image"
            );
        }

        self.runtime
            .remove_container(&details.id, REPLACE)
            .await
            .map_err(|e| step_error(RecreateStep::Remove, e))?;

        let spec = CreateContainer {
            name: name.clone(),
            config: details.config,
            host_config: details.host_config,
            endpoints: details.endpoints,
        };
        let new_id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|e| step_error(RecreateStep::Create, e))?;

        self.runtime
            .start_container(&new_id)
            .await
            .map_err(|e| step_error(RecreateStep::Start, e))?;

        info!(
            container = %name,
            old_id = %short_id(&details.id),
            new_id = %short_id(&new_id),
            "Recreated container"
        );

        Ok(Recreated {
            name,
            old_id: details.id,
            new_id,
        })
    }
}

/// The configured image, if it is a content-addressed ID rather than a name.
fn pinned_image(config: &Value) -> Option<&str> {
    config
        .get("Image")
        .and_then(Value::as_str)
        .filter(|image| image.starts_with(DIGEST_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockContainer, MockOp, MockRuntime};
    use serde_json::json;

    fn runtime_with_app() -> MockRuntime {
        MockRuntime::new().with_container(
            MockContainer::new("c1", "app", "myrepo/app:latest", "sha256:d1")
                .config(json!({"Image": "myrepo/app:latest", "Env": ["MODE=prod"]}))
                .host_config(json!({"RestartPolicy": {"Name": "always"}}))
                .network("backend", json!({"Aliases": ["app"]})),
        )
    }

    #[tokio::test]
    async fn test_recreate_preserves_configuration() {
        let runtime = Arc::new(runtime_with_app());
        let recreator = Recreator::new(runtime.clone());

        let recreated = recreator.recreate("c1").await.unwrap();
        assert_eq!(recreated.name, "app");
        assert_eq!(recreated.old_id, "c1");
        assert_ne!(recreated.new_id, "c1");

        assert_eq!(runtime.removed(), vec![("c1".to_string(), REPLACE)]);
        assert_eq!(runtime.started(), vec![recreated.new_id.clone()]);

        let created = runtime.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, "app");
        assert_eq!(created[0].config["Env"][0], "MODE=prod");
        assert_eq!(created[0].host_config["RestartPolicy"]["Name"], "always");
        assert_eq!(created[0].endpoints["backend"]["Aliases"][0], "app");
    }

    #[tokio::test]
    async fn test_inspect_failure_leaves_container() {
        let runtime = Arc::new(runtime_with_app().fail(
            MockOp::InspectContainer,
            RuntimeError::Unreachable("down".to_string()),
        ));
        let recreator = Recreator::new(runtime.clone());

        let err = recreator.recreate("c1").await.unwrap_err();
        assert!(matches!(err, UpdateError::Inspection { .. }));
        assert_eq!(runtime.containers().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_failure_is_tagged() {
        let runtime = Arc::new(runtime_with_app().fail(
            MockOp::Remove,
            RuntimeError::Api {
                status: 500,
                message: "device busy".to_string(),
            },
        ));
        let recreator = Recreator::new(runtime);

        match recreator.recreate("c1").await.unwrap_err() {
            UpdateError::Recreate(err) => {
                assert_eq!(err.step, RecreateStep::Remove);
                assert!(!err.original_removed());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_create_failure_after_remove() {
        let runtime = Arc::new(runtime_with_app().fail(
            MockOp::Create,
            RuntimeError::Api {
                status: 400,
                message: "invalid config".to_string(),
            },
        ));
        let recreator = Recreator::new(runtime.clone());

        match recreator.recreate("c1").await.unwrap_err() {
            UpdateError::Recreate(err) => {
                assert_eq!(err.step, RecreateStep::Create);
                assert!(err.original_removed());
                assert_eq!(err.to_string(), "failed to create container app: runtime API error 400: invalid config");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_is_tagged() {
        let runtime = Arc::new(runtime_with_app().fail(
            MockOp::Start,
            RuntimeError::Api {
                status: 500,
                message: "port is already allocated".to_string(),
            },
        ));
        let recreator = Recreator::new(runtime.clone());

        match recreator.recreate("c1").await.unwrap_err() {
            UpdateError::Recreate(err) => assert_eq!(err.step, RecreateStep::Start),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runtime.created().len(), 1);
        assert!(runtime.started().is_empty());
    }

    #[test]
    fn test_pinned_image() {
        assert_eq!(
            pinned_image(&json!({"Image": "sha256:d1"})),
            Some("sha256:d1")
        );
        assert_eq!(pinned_image(&json!({"Image": "myrepo/app:latest"})), None);
        assert_eq!(pinned_image(&json!({})), None);
    }

    #[tokio::test]
    async fn test_recreate_keeps_configured_image_id() {
        let runtime = Arc::new(MockRuntime::new().with_container(MockContainer::new(
            "c_app",
            "app",
            "sha256:d1",
            "sha256:d1",
        )));

        let recreated = Recreator::new(runtime.clone())
            .recreate("c_app")
            .await
            .unwrap();

        let after = runtime.container_named("app").unwrap();
        assert_eq!(after.id, recreated.new_id);
        assert_eq!(after.config["Image"], "sha256:d1");
    }
}
