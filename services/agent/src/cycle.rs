//! One update cycle over the running containers.
//!
//! For every running container not managed by compose, in listing order:
//! 1. Resolve the canonical image reference
//! 2. Reuse this cycle's result for that image, or pull, inspect and compare
//! 3. Recreate the container if the image was updated
//!
//! Containers are processed strictly one at a time. Each image is pulled at
//! most once per cycle no matter how many containers use it.

use std::sync::Arc;

use tidewatch_registry_auth::CredentialProvider;
use tracing::{debug, error, info, warn};

use crate::cache::{ImageStatus, UpdateCache};
use crate::config::UpdaterConfig;
use crate::error::{CycleError, UpdateError};
use crate::image::{image_changed, ImagePuller};
use crate::recreate::{Recreated, Recreator};
use crate::resolve::{resolve_image, CanonicalImage};
use crate::runtime::{short_id, ContainerRuntime, ContainerSummary};

/// Why a container was not considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Compose owns the container.
    ComposeManaged,

    /// The container is not running; carries its state.
    NotRunning(String),
}

/// What happened to one container during a cycle.
#[derive(Debug)]
pub enum ContainerOutcome {
    /// Its image has no newer version.
    UpToDate,

    /// It was replaced by a container on the new image.
    Updated(Recreated),

    /// It was not considered.
    Skipped(SkipReason),

    /// Updating it failed.
    Failed(UpdateError),
}

/// Outcome for one container.
#[derive(Debug)]
pub struct ContainerReport {
    /// Container ID at the start of the cycle.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Image as the container reports it.
    pub image: String,

    pub outcome: ContainerOutcome,
}

/// Result of a completed cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Per-container outcomes in listing order.
    pub containers: Vec<ContainerReport>,

    /// Number of pulls performed.
    pub pulls: usize,
}

impl CycleReport {
    fn count(&self, pred: impl Fn(&ContainerOutcome) -> bool) -> usize {
        self.containers.iter().filter(|c| pred(&c.outcome)).count()
    }

    /// Containers replaced this cycle.
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ContainerOutcome::Updated(_)))
    }

    /// Containers already on their latest image.
    pub fn up_to_date(&self) -> usize {
        self.count(|o| matches!(o, ContainerOutcome::UpToDate))
    }

    /// Containers not considered.
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ContainerOutcome::Skipped(_)))
    }

    /// Containers that failed to update.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ContainerOutcome::Failed(_)))
    }

    /// Report for the container with this display name.
    pub fn container(&self, name: &str) -> Option<&ContainerReport> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Runs update cycles against a container runtime.
pub struct Updater {
    runtime: Arc<dyn ContainerRuntime>,
    credentials: Arc<dyn CredentialProvider>,
    puller: ImagePuller,
    recreator: Recreator,
    config: UpdaterConfig,
}

impl Updater {
    /// Create a new updater.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        credentials: Arc<dyn CredentialProvider>,
        config: UpdaterConfig,
    ) -> Self {
        Self {
            puller: ImagePuller::new(Arc::clone(&runtime), config.pull_all_tags),
            recreator: Recreator::new(Arc::clone(&runtime)),
            runtime,
            credentials,
            config,
        }
    }

    /// Configuration this updater runs with.
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Run one cycle over the current containers.
    ///
    /// Fails if the containers cannot be listed, or on the first container
    /// error when bailing is enabled. Otherwise container errors are logged
    /// and reported in the returned [`CycleReport`].
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        info!("Checking for updates");

        let containers = self
            .runtime
            .list_containers()
            .await
            .map_err(CycleError::Enumerate)?;

        let mut cache = UpdateCache::new();
        let mut report = CycleReport::default();

        for container in &containers {
            let name = container.display_name().to_string();
            let outcome = self.process(container, &mut cache, &mut report).await;

            if let ContainerOutcome::Failed(err) = &outcome {
                error!(
                    container = %name,
                    image = %container.image,
                    kind = err.kind(),
                    error = %err,
                    "Failed to update container"
                );
            }

            let outcome = match outcome {
                ContainerOutcome::Failed(source) if self.config.bail => {
                    return Err(CycleError::Bailed {
                        container: name,
                        image: container.image.clone(),
                        source,
                    });
                }
                outcome => outcome,
            };

            report.containers.push(ContainerReport {
                id: container.id.clone(),
                name,
                image: container.image.clone(),
                outcome,
            });
        }

        info!(
            containers = report.containers.len(),
            images = cache.len(),
            images_updated = cache.updated_count(),
            pulls = report.pulls,
            updated = report.updated(),
            up_to_date = report.up_to_date(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Update check complete"
        );
        Ok(report)
    }

    async fn process(
        &self,
        container: &ContainerSummary,
        cache: &mut UpdateCache,
        report: &mut CycleReport,
    ) -> ContainerOutcome {
        if container.is_compose_managed() {
            debug!(container = %container.display_name(), "Skipping compose-managed container");
            return ContainerOutcome::Skipped(SkipReason::ComposeManaged);
        }
        if !container.is_running() {
            debug!(
                container = %container.display_name(),
                state = %container.state,
                "Skipping container that is not running"
            );
            return ContainerOutcome::Skipped(SkipReason::NotRunning(container.state.clone()));
        }

        match self.update_container(container, cache, report).await {
            Ok(outcome) => outcome,
            Err(err) => ContainerOutcome::Failed(err),
        }
    }

    async fn update_container(
        &self,
        container: &ContainerSummary,
        cache: &mut UpdateCache,
        report: &mut CycleReport,
    ) -> Result<ContainerOutcome, UpdateError> {
        let name = container.display_name();
        let image = resolve_image(self.runtime.as_ref(), name, &container.image).await?;

        let status = match cache.get(&image) {
            Some(status) => {
                debug!(container = %name, image = %image, status = ?status, "Image already checked this cycle");
                status.clone()
            }
            None => {
                report.pulls += 1;
                let status = match self.check_image(&image, container).await {
                    Ok(true) => ImageStatus::Updated,
                    Ok(false) => ImageStatus::Unchanged,
                    Err(err) => {
                        cache.record(&image, ImageStatus::Failed(err.to_string()));
                        return Err(err);
                    }
                };
                cache.record(&image, status.clone());
                status
            }
        };

        match status {
            ImageStatus::Updated => {
                info!(container = %name, id = %short_id(&container.id), image = %image, "Restarting container on updated image");
                let recreated = self.recreator.recreate(&container.id).await?;
                Ok(ContainerOutcome::Updated(recreated))
            }
            ImageStatus::Unchanged => {
                info!(container = %name, image = %image, "Container is up-to-date");
                Ok(ContainerOutcome::UpToDate)
            }
            ImageStatus::Failed(reason) => Err(UpdateError::PreviouslyFailed {
                reference: image.reference,
                reason,
            }),
        }
    }

    /// Pull an image and report whether it differs from the container's.
    async fn check_image(
        &self,
        image: &CanonicalImage,
        container: &ContainerSummary,
    ) -> Result<bool, UpdateError> {
        let auth = self.credentials.token_for(&image.registry);
        if auth.is_none() {
            debug!(registry = %image.registry, "No credentials for registry, pulling anonymously");
        }

        let pulled = self.puller.pull(image, auth).await?;
        if let Some(status) = &pulled.last_status {
            debug!(image = %image, status = %status, "Pull status");
        }

        let details = self
            .runtime
            .inspect_image(&image.reference)
            .await
            .map_err(|source| UpdateError::Inspection {
                target: format!("image {}", image.reference),
                source,
            })?;

        let changed = image_changed(&details.id, &container.image_id);
        if changed {
            warn!(
                image = %image,
                running = %short_id(&container.image_id),
                latest = %short_id(&details.id),
                "Newer image available"
            );
        }
        Ok(changed)
    }
}
