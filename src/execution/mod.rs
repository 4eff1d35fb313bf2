//! Sandboxed execution: the framed protocol between the host-side bridge and
//! the entrypoint running inside the container.

pub mod artifact;
pub mod bridge;
pub mod entrypoint;
pub mod frame;
pub mod handlers;
pub mod outcome;

pub use artifact::{ArtifactBuilder, ArtifactError, METADATA_PATH};
pub use bridge::{ExecutionAttempt, ExecutionBridge, ExecutionState};
pub use entrypoint::{EntryPoint, EntryResolver, Entrypoint, InvocationError, ProcessResolver, ResolutionError};
pub use frame::FrameError;
pub use handlers::HandlerRegistry;
pub use outcome::{ErrorKind, ExecutionOutcome, ExecutionReturnValue, PlatformFailureKind};
