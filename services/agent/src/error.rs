//! Errors surfaced per container and per cycle.

use thiserror::Error;

use crate::image::PullError;
use crate::recreate::RecreateError;
use crate::resolve::ResolveError;
use crate::runtime::RuntimeError;

/// Why updating a single container failed.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("failed to inspect {target}: {source}")]
    Inspection {
        target: String,
        #[source]
        source: RuntimeError,
    },

    #[error(transparent)]
    Pull(#[from] PullError),

    #[error(transparent)]
    Recreate(#[from] RecreateError),

    #[error("image {reference} already failed this cycle: {reason}")]
    PreviouslyFailed { reference: String, reason: String },
}

impl UpdateError {
    /// Short category name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "resolution",
            Self::Inspection { .. } => "inspection",
            Self::Pull(_) | Self::PreviouslyFailed { .. } => "pull",
            Self::Recreate(_) => "recreate",
        }
    }
}

/// Errors that end a cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The runtime could not enumerate containers at all.
    #[error("failed to list containers: {0}")]
    Enumerate(#[source] RuntimeError),

    /// A container failed and the run is configured to bail on errors.
    #[error("container {container} ({image}): {source}")]
    Bailed {
        container: String,
        image: String,
        #[source]
        source: UpdateError,
    },
}
