//! tidewatch agent library
//!
//! The agent inspects the running containers on a host, checks whether a
//! newer version of each container's image is available upstream, and
//! replaces containers whose image was updated with a fresh container built
//! from the same configuration.
//!
//! ## Architecture
//!
//! ```text
//! scheduler::run
//! └── Updater::run_cycle        (one pass, fresh UpdateCache)
//!     ├── resolve_image         (canonical registry/namespace/repo[:tag])
//!     ├── ImagePuller::pull     (once per image per cycle)
//!     ├── image_changed         (pulled image vs. running image)
//!     └── Recreator::recreate   (remove, create, start)
//! ```
//!
//! ## Modules
//!
//! - `runtime`: Container runtime interface and mock implementation
//! - `docker`: Docker Engine runtime over the local unix socket
//! - `resolve`: Canonical image references
//! - `image`: Pulling and digest comparison
//! - `recreate`: In-place container recreation
//! - `cycle`: Update cycle orchestration
//! - `scheduler`: Run-once and watch modes

pub mod cache;
pub mod config;
pub mod cycle;
pub mod docker;
pub mod error;
pub mod image;
pub mod recreate;
pub mod resolve;
pub mod runtime;
pub mod scheduler;

// Re-export commonly used types
pub use config::{Cli, UpdaterConfig};
pub use cycle::{ContainerOutcome, CycleReport, Updater};
pub use error::{CycleError, UpdateError};
pub use recreate::{RecreateError, RecreateStep, Recreated, Recreator};
pub use runtime::{ContainerRuntime, MockRuntime};
