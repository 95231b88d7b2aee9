//! Canonical image references for running containers.
//!
//! A container's image field is either a reference (`nginx`, `myrepo/app:1.2`,
//! `ghcr.io/org/app:v1`) or, when the container was created from an image ID,
//! a `sha256:` digest. Both are mapped to a fully qualified
//! `registry/namespace/repository[:tag]` reference plus the registry name used
//! for credential lookup.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::runtime::{ContainerRuntime, RuntimeError};

/// Prefix of content-addressed image IDs.
pub const DIGEST_PREFIX: &str = "sha256:";

/// Placeholder some engines report for untagged images (`<none>:<none>`).
const UNTAGGED: &str = "<none>";

/// Registry assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Namespace assumed for single-component references on the default registry.
pub const DEFAULT_NAMESPACE: &str = "library";

/// Errors from resolving a container's image.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot resolve image {image} of container {container}: no tagged name for this digest")]
    UnresolvableDigestImage {
        container: String,
        image: String,
        #[source]
        source: Option<RuntimeError>,
    },

    #[error("unexpected number of path separators in image {image} of container {container}")]
    MalformedImageReference { container: String, image: String },
}

/// A fully qualified image reference and the registry it lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalImage {
    /// Registry name, [`DEFAULT_REGISTRY`] when the reference names none.
    pub registry: String,

    /// `registry/namespace/repository[:tag]`.
    pub reference: String,
}

impl fmt::Display for CanonicalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference)
    }
}

/// Resolve the canonical image of a container from its raw image field.
///
/// Digest images are mapped back to the first tagged name the runtime knows
/// for them, without its tag.
pub async fn resolve_image(
    runtime: &dyn ContainerRuntime,
    container: &str,
    raw_image: &str,
) -> Result<CanonicalImage, ResolveError> {
    if !raw_image.starts_with(DIGEST_PREFIX) {
        return canonicalize(container, raw_image);
    }

    let unresolvable = |source| ResolveError::UnresolvableDigestImage {
        container: container.to_string(),
        image: raw_image.to_string(),
        source,
    };

    let details = runtime
        .inspect_image(raw_image)
        .await
        .map_err(|e| unresolvable(Some(e)))?;

    let name = details
        .repo_tags
        .iter()
        .map(|tag| split_tag(tag).0)
        .find(|name| !name.is_empty() && *name != UNTAGGED && !name.starts_with(DIGEST_PREFIX))
        .ok_or_else(|| unresolvable(None))?;

    debug!(container = %container, digest = %raw_image, image = %name, "Resolved digest image");
    canonicalize(container, name)
}

/// Qualify an image reference with the default registry and namespace.
///
/// The number of `/` separators decides: none gets registry and namespace,
/// one gets the registry, two already name a registry, more are rejected.
pub fn canonicalize(container: &str, image: &str) -> Result<CanonicalImage, ResolveError> {
    match image.matches('/').count() {
        0 => Ok(CanonicalImage {
            registry: DEFAULT_REGISTRY.to_string(),
            reference: format!("{DEFAULT_REGISTRY}/{DEFAULT_NAMESPACE}/{image}"),
        }),
        1 => Ok(CanonicalImage {
            registry: DEFAULT_REGISTRY.to_string(),
            reference: format!("{DEFAULT_REGISTRY}/{image}"),
        }),
        2 => {
            let registry = image.split('/').next().unwrap_or_default();
            Ok(CanonicalImage {
                registry: registry.to_string(),
                reference: image.to_string(),
            })
        }
        _ => Err(ResolveError::MalformedImageReference {
            container: container.to_string(),
            image: image.to_string(),
        }),
    }
}

/// Split a reference into its name and its tag or digest.
///
/// A `:` only starts a tag after the last `/`, so registry ports survive:
/// `localhost:5000/app:1` splits into `localhost:5000/app` and `1`.
pub fn split_tag(reference: &str) -> (&str, Option<&str>) {
    if let Some((name, digest)) = reference.split_once('@') {
        return (name, Some(digest));
    }

    let last_component = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[last_component..].rfind(':') {
        Some(i) => {
            let at = last_component + i;
            (&reference[..at], Some(&reference[at + 1..]))
        }
        None => (reference, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ImageDetails, MockOp, MockRuntime};
    use rstest::rstest;

    #[rstest]
    #[case("nginx", "docker.io", "docker.io/library/nginx")]
    #[case("nginx:1.25", "docker.io", "docker.io/library/nginx:1.25")]
    #[case("myrepo/app:latest", "docker.io", "docker.io/myrepo/app:latest")]
    #[case("ghcr.io/org/app:v1", "ghcr.io", "ghcr.io/org/app:v1")]
    #[case("localhost:5000/team/app", "localhost:5000", "localhost:5000/team/app")]
    fn test_canonicalize(#[case] image: &str, #[case] registry: &str, #[case] reference: &str) {
        let resolved = canonicalize("web", image).unwrap();
        assert_eq!(resolved.registry, registry);
        assert_eq!(resolved.reference, reference);
    }

    #[rstest]
    #[case("a/b/c/d")]
    #[case("a/b/c/d/e")]
    fn test_canonicalize_too_many_separators(#[case] image: &str) {
        let err = canonicalize("web", image).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::MalformedImageReference { ref container, .. } if container == "web"
        ));
    }

    #[rstest]
    #[case("nginx", "nginx", None)]
    #[case("nginx:1.25", "nginx", Some("1.25"))]
    #[case("localhost:5000/app", "localhost:5000/app", None)]
    #[case("localhost:5000/app:1", "localhost:5000/app", Some("1"))]
    #[case("nginx@sha256:abc", "nginx", Some("sha256:abc"))]
    fn test_split_tag(#[case] reference: &str, #[case] name: &str, #[case] tag: Option<&str>) {
        assert_eq!(split_tag(reference), (name, tag));
    }

    #[tokio::test]
    async fn test_plain_reference_skips_inspect() {
        let runtime = MockRuntime::new().fail(
            MockOp::InspectImage,
            RuntimeError::Unreachable("down".to_string()),
        );
        let resolved = resolve_image(&runtime, "web", "nginx").await.unwrap();
        assert_eq!(resolved.reference, "docker.io/library/nginx");
    }

    #[tokio::test]
    async fn test_digest_resolves_to_first_tag_without_suffix() {
        let runtime = MockRuntime::new().with_image(
            "sha256:d1",
            ImageDetails {
                id: "sha256:d1".to_string(),
                repo_tags: vec![
                    "myrepo/app:latest".to_string(),
                    "other/name:v2".to_string(),
                ],
            },
        );

        let resolved = resolve_image(&runtime, "app", "sha256:d1").await.unwrap();
        assert_eq!(resolved.reference, "docker.io/myrepo/app");
        assert_eq!(resolved.registry, "docker.io");
    }

    #[tokio::test]
    async fn test_digest_without_tags_is_unresolvable() {
        for repo_tags in [vec![], vec!["<none>:<none>".to_string()]] {
            let runtime = MockRuntime::new().with_image(
                "sha256:d1",
                ImageDetails {
                    id: "sha256:d1".to_string(),
                    repo_tags,
                },
            );

            let err = resolve_image(&runtime, "app", "sha256:d1").await.unwrap_err();
            assert!(matches!(
                err,
                ResolveError::UnresolvableDigestImage { source: None, .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_digest_skips_untagged_placeholder() {
        let runtime = MockRuntime::new().with_image(
            "sha256:d1",
            ImageDetails {
                id: "sha256:d1".to_string(),
                repo_tags: vec!["<none>:<none>".to_string(), "myrepo/app:v3".to_string()],
            },
        );

        let resolved = resolve_image(&runtime, "app", "sha256:d1").await.unwrap();
        assert_eq!(resolved.reference, "docker.io/myrepo/app");
    }

    #[tokio::test]
    async fn test_digest_inspect_failure_is_unresolvable() {
        let runtime = MockRuntime::new();
        let err = resolve_image(&runtime, "app", "sha256:missing").await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::UnresolvableDigestImage { source: Some(RuntimeError::NotFound(_)), .. }
        ));
    }
}
