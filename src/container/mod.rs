//! Container engine abstraction.
//!
//! An engine builds images from a staging directory, starts containers from
//! them and hands back their stdin/stdout for the framed exchange.

pub mod builder;
pub mod docker;
pub mod memory;

use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

pub use builder::ImageBuilder;
pub use docker::DockerEngine;
pub use memory::InMemoryEngine;

/// An immutable, built image. Reusable across runs of the same deployed version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageHandle {
    /// Engine-assigned image id.
    pub id: String,
    pub tag: String,
}

pub trait ContainerEngine: Send + Sync {
    /// Builds `context_dir` (which holds a `Dockerfile`) into an image tagged `tag`.
    fn build_image(&self, context_dir: &Path, tag: &str) -> Result<ImageHandle, PlatformError>;

    /// Starts a fresh container with its stdin and stdout attached.
    fn run(&self, image: &ImageHandle) -> Result<Box<dyn RunningContainer>, PlatformError>;

    fn remove_image(&self, image: &ImageHandle) -> Result<(), PlatformError>;
}

/// A started container. Dropping the handle without calling `stop` may leak
/// the container; callers go through `ContainerGuard`.
pub trait RunningContainer: Send {
    fn id(&self) -> &str;

    /// Input side. Dropping the writer closes the container's stdin.
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>>;

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Stops and removes the container. Idempotent.
    fn stop(&mut self) -> Result<(), PlatformError>;
}

/// Tears the container down when dropped.
pub struct ContainerGuard {
    container: Box<dyn RunningContainer>,
}

impl ContainerGuard {
    pub fn new(container: Box<dyn RunningContainer>) -> Self {
        ContainerGuard { container }
    }

    pub fn container(&mut self) -> &mut dyn RunningContainer {
        self.container.as_mut()
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if let Err(e) = self.container.stop() {
            tracing::warn!(container = %self.container.id(), error = %e, "container teardown failed");
        }
    }
}
