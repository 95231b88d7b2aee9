//! Docker Engine API payloads.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::runtime::{ContainerDetails, ContainerSummary, CreateContainer, ImageDetails};

/// Entry of `GET /containers/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummaryResponse {
    pub id: String,

    #[serde(default)]
    pub names: Option<Vec<String>>,

    #[serde(default)]
    pub image: String,

    #[serde(default, rename = "ImageID")]
    pub image_id: String,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

impl From<ContainerSummaryResponse> for ContainerSummary {
    fn from(c: ContainerSummaryResponse) -> Self {
        Self {
            id: c.id,
            names: c.names.unwrap_or_default(),
            image: c.image,
            image_id: c.image_id,
            state: c.state,
            labels: c.labels.unwrap_or_default(),
        }
    }
}

/// Response of `GET /containers/{id}/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspectResponse {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// ID of the image the container was started from.
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub config: Value,

    #[serde(default)]
    pub host_config: Value,

    #[serde(default)]
    pub network_settings: NetworkSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    #[serde(default)]
    pub networks: Option<Map<String, Value>>,
}

impl From<ContainerInspectResponse> for ContainerDetails {
    fn from(c: ContainerInspectResponse) -> Self {
        Self {
            id: c.id,
            name: c.name,
            image_id: c.image,
            config: c.config,
            host_config: c.host_config,
            endpoints: c.network_settings.networks.unwrap_or_default(),
        }
    }
}

/// Response of `GET /images/{name}/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInspectResponse {
    pub id: String,

    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
}

impl From<ImageInspectResponse> for ImageDetails {
    fn from(i: ImageInspectResponse) -> Self {
        Self {
            id: i.id,
            repo_tags: i.repo_tags.unwrap_or_default(),
        }
    }
}

/// Response of `POST /containers/create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainerResponse {
    pub id: String,

    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

/// Error body returned by the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// Body of `POST /containers/create`: the container config with the host
/// and networking configuration nested in it.
pub fn create_body(spec: &CreateContainer) -> Value {
    let mut body = match &spec.config {
        Value::Object(config) => config.clone(),
        _ => Map::new(),
    };

    body.insert("HostConfig".to_string(), spec.host_config.clone());

    let mut networking = Map::new();
    networking.insert(
        "EndpointsConfig".to_string(),
        Value::Object(spec.endpoints.clone()),
    );
    body.insert("NetworkingConfig".to_string(), Value::Object(networking));

    Value::Object(body)
}
