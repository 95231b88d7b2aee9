//! Digest comparison between a freshly pulled image and a running container.

/// Returns true if the pulled image differs from the one the container
/// was started from.
pub fn image_changed(pulled_id: &str, running_id: &str) -> bool {
    pulled_id != running_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_digest_is_unchanged() {
        assert!(!image_changed("sha256:d1", "sha256:d1"));
    }

    #[test]
    fn test_different_digest_is_changed() {
        assert!(image_changed("sha256:d2", "sha256:d1"));
    }
}
