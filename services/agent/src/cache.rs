//! Per-cycle record of which images were already checked.
//!
//! Containers sharing an image reuse its result instead of pulling again.
//! A cache lives for exactly one cycle and is dropped at the end of it.

use std::collections::HashMap;

use crate::resolve::CanonicalImage;

/// Result of checking one image during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStatus {
    /// Pulled, and the image matches what containers were started from.
    Unchanged,

    /// Pulled, and a newer image is now available locally.
    Updated,

    /// Pull or inspection failed.
    Failed(String),
}

impl ImageStatus {
    /// Returns true if containers on this image must be recreated.
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated)
    }
}

/// Image status by canonical reference for a single cycle.
///
/// A reference with no entry has not been processed yet.
#[derive(Debug, Default)]
pub struct UpdateCache {
    entries: HashMap<String, ImageStatus>,
}

impl UpdateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of an image, if it was processed this cycle.
    pub fn get(&self, image: &CanonicalImage) -> Option<&ImageStatus> {
        self.entries.get(&image.reference)
    }

    /// Record the status of an image.
    pub fn record(&mut self, image: &CanonicalImage, status: ImageStatus) {
        self.entries.insert(image.reference.clone(), status);
    }

    /// Number of images processed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no image was processed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of images with a newer version pulled.
    pub fn updated_count(&self) -> usize {
        self.entries.values().filter(|s| s.is_updated()).count()
    }
}
