//! Image puller that reduces a runtime pull stream to success or failure.
//!
//! The runtime reports pull progress as newline-delimited JSON events.
//! An event with an `error` field fails the pull, an undecodable line fails
//! it too, and end of stream means success. Progress and status lines are
//! only logged.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::resolve::CanonicalImage;
use crate::runtime::{ContainerRuntime, PullRequest, RuntimeError};

/// Status fragment of the registry's schema1 deprecation notice.
pub const SCHEMA1_NOTICE: &str = "uses outdated schema1 manifest format";

/// Log target for pull progress lines.
const PROGRESS_TARGET: &str = "tidewatch::pull";

/// Errors from pulling an image.
#[derive(Debug, Error)]
pub enum PullError {
    #[error("failed to request pull of {reference}: {source}")]
    Request {
        reference: String,
        #[source]
        source: RuntimeError,
    },

    #[error("pull of {reference} interrupted: {source}")]
    Stream {
        reference: String,
        #[source]
        source: RuntimeError,
    },

    #[error("pull of {reference} failed: {message}")]
    Registry { reference: String, message: String },

    #[error("undecodable pull event for {reference}: {source}")]
    Decode {
        reference: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One event of a pull stream.
#[derive(Debug, Default, Deserialize)]
struct PullEvent {
    #[serde(default)]
    status: Option<String>,

    #[serde(default)]
    id: Option<String>,

    #[serde(default)]
    progress: Option<String>,

    #[serde(default)]
    error: Option<String>,
}

/// Summary of a successful pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Number of events received.
    pub events: usize,

    /// Last status reported, e.g. "Status: Image is up to date for nginx:latest".
    pub last_status: Option<String>,
}

/// Pulls canonical image references through a runtime.
pub struct ImagePuller {
    runtime: Arc<dyn ContainerRuntime>,
    all_tags: bool,
}

impl ImagePuller {
    /// Create a new image puller.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, all_tags: bool) -> Self {
        Self { runtime, all_tags }
    }

    /// Pull `image`, consuming the whole progress stream.
    pub async fn pull(
        &self,
        image: &CanonicalImage,
        auth: Option<String>,
    ) -> Result<PullReport, PullError> {
        let start = Instant::now();
        let reference = image.reference.as_str();

        info!(
            image = %reference,
            registry = %image.registry,
            authenticated = auth.is_some(),
            "Checking image"
        );

        let request = PullRequest {
            reference: reference.to_string(),
            all_tags: self.all_tags,
            auth,
        };

        let mut lines = self
            .runtime
            .pull_image(&request)
            .await
            .map_err(|source| PullError::Request {
                reference: reference.to_string(),
                source,
            })?;

        let mut report = PullReport::default();
        while let Some(line) = lines.next().await {
            let line = line.map_err(|source| PullError::Stream {
                reference: reference.to_string(),
                source,
            })?;
            let event: PullEvent =
                serde_json::from_slice(&line).map_err(|source| PullError::Decode {
                    reference: reference.to_string(),
                    source,
                })?;
            report.events += 1;

            if let Some(message) = event.error {
                return Err(PullError::Registry {
                    reference: reference.to_string(),
                    message,
                });
            }

            if let Some(progress) = progress_line(reference, &event) {
                debug!(target: PROGRESS_TARGET, "{}", progress);
            }

            if let Some(status) = event.status {
                if !status.contains(SCHEMA1_NOTICE) {
                    report.last_status = Some(status);
                }
            }
        }

        debug!(
            image = %reference,
            events = report.events,
            duration_ms = start.elapsed().as_millis() as u64,
            "Pull finished"
        );
        Ok(report)
    }
}

/// Human-readable line for an event, `None` for suppressed notices.
fn progress_line(reference: &str, event: &PullEvent) -> Option<String> {
    let status = event.status.as_deref().unwrap_or_default();
    if event.progress.is_none() && (status.is_empty() || status.contains(SCHEMA1_NOTICE)) {
        return None;
    }

    let mut line = reference.to_string();
    if let Some(id) = &event.id {
        line.push(' ');
        line.push_str(id);
    }
    line.push(':');
    if !status.is_empty() {
        line.push(' ');
        line.push_str(status);
    }
    if let Some(progress) = &event.progress {
        line.push(' ');
        line.push_str(progress);
    }
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockOp, MockRuntime};

    const NGINX: &str = "docker.io/library/nginx";

    fn nginx() -> CanonicalImage {
        CanonicalImage {
            registry: "docker.io".to_string(),
            reference: NGINX.to_string(),
        }
    }

    #[tokio::test]
    async fn test_pull_success() {
        let runtime = Arc::new(MockRuntime::new().with_pull(
            NGINX,
            &[
                r#"{"status":"Pulling from library/nginx","id":"latest"}"#,
                r#"{"status":"Downloading","id":"a1b2","progress":"[==>   ] 1MB/5MB"}"#,
                r#"{"status":"Status: Downloaded newer image for nginx:latest"}"#,
            ],
            "sha256:d2",
        ));
        let puller = ImagePuller::new(runtime.clone(), true);

        let report = puller.pull(&nginx(), Some("token".to_string())).await.unwrap();
        assert_eq!(report.events, 3);
        assert_eq!(
            report.last_status.as_deref(),
            Some("Status: Downloaded newer image for nginx:latest")
        );

        let requests = runtime.pull_requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].all_tags);
        assert_eq!(requests[0].auth.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn test_pull_error_event_fails() {
        let runtime = Arc::new(MockRuntime::new().with_pull(
            NGINX,
            &[
                r#"{"status":"Pulling from library/nginx"}"#,
                r#"{"errorDetail":{"message":"unauthorized"},"error":"unauthorized: authentication required"}"#,
                r#"{"status":"never reached"}"#,
            ],
            "sha256:d2",
        ));
        let puller = ImagePuller::new(runtime, true);

        let err = puller.pull(&nginx(), None).await.unwrap_err();
        match err {
            PullError::Registry { message, .. } => {
                assert_eq!(message, "unauthorized: authentication required")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_line_fails() {
        let runtime = Arc::new(MockRuntime::new().with_pull(
            NGINX,
            &[r#"{"status":"Pulling"}"#, "not json"],
            "sha256:d2",
        ));
        let puller = ImagePuller::new(runtime, true);

        let err = puller.pull(&nginx(), None).await.unwrap_err();
        assert!(matches!(err, PullError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_schema1_notice_is_not_an_error() {
        let runtime = Arc::new(MockRuntime::new().with_pull(
            NGINX,
            &[
                r#"{"status":"Status: Image is up to date for nginx:latest"}"#,
                r#"{"status":"[DEPRECATION NOTICE] registry v2 schema1 support will be removed; nginx uses outdated schema1 manifest format"}"#,
            ],
            "sha256:d1",
        ));
        let puller = ImagePuller::new(runtime, false);

        let report = puller.pull(&nginx(), None).await.unwrap();
        assert_eq!(report.events, 2);
        assert_eq!(
            report.last_status.as_deref(),
            Some("Status: Image is up to date for nginx:latest")
        );
    }

    #[tokio::test]
    async fn test_broken_stream_fails() {
        let runtime = Arc::new(MockRuntime::new().with_broken_pull(
            NGINX,
            &[r#"{"status":"Pulling"}"#],
            RuntimeError::Unreachable("connection reset".to_string()),
        ));
        let puller = ImagePuller::new(runtime, true);

        let err = puller.pull(&nginx(), None).await.unwrap_err();
        assert!(matches!(err, PullError::Stream { .. }));
    }

    #[tokio::test]
    async fn test_request_failure() {
        let runtime = Arc::new(MockRuntime::new().fail(
            MockOp::Pull,
            RuntimeError::Api {
                status: 500,
                message: "registry unreachable".to_string(),
            },
        ));
        let puller = ImagePuller::new(runtime, true);

        let err = puller.pull(&nginx(), None).await.unwrap_err();
        assert!(matches!(err, PullError::Request { .. }));
        assert!(err.to_string().contains(NGINX));
    }

    #[test]
    fn test_progress_line() {
        let event = PullEvent {
            status: Some("Downloading".to_string()),
            id: Some("a1b2".to_string()),
            progress: Some("[=>  ] 1MB/5MB".to_string()),
            error: None,
        };
        assert_eq!(
            progress_line(NGINX, &event).as_deref(),
            Some("docker.io/library/nginx a1b2: Downloading [=>  ] 1MB/5MB")
        );

        let notice = PullEvent {
            status: Some(format!("nginx {SCHEMA1_NOTICE}")),
            ..Default::default()
        };
        assert!(progress_line(NGINX, &notice).is_none());
    }
}
