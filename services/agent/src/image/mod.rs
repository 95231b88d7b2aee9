//! Image pulling and change detection.
//!
//! This module handles:
//! - Pulling canonical image references through the runtime
//! - Reducing the pull's progress stream to success or failure
//! - Comparing the pulled image against a container's running image

mod digest;
mod puller;

pub use digest::image_changed;
pub use puller::{ImagePuller, PullError, PullReport, SCHEMA1_NOTICE};
