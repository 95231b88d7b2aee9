//! Docker Engine runtime.
//!
//! This module talks to the Docker Engine HTTP API over its unix socket
//! and adapts it to the [`ContainerRuntime`](crate::runtime::ContainerRuntime)
//! interface.
//!
//! Reference: https://docs.docker.com/engine/api/

mod api;
mod runtime;
mod stream;
mod types;

pub use api::{DockerClient, DockerError, DEFAULT_SOCKET};
pub use runtime::DockerRuntime;
pub use types::{
    ContainerInspectResponse, ContainerSummaryResponse, CreateContainerResponse,
    ImageInspectResponse,
};
