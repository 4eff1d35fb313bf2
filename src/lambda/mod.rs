//! Lambdas and the decorator chain wrapped around them.
//!
//! Callers only ever hold a `Box<dyn AbstractLambda>`. The factory builds the
//! chain `PermissionLayer -> MonitoringLayer -> Lambda`; each layer runs its
//! concern and then delegates inward.

pub mod base;
pub mod decorator;
pub mod factory;
pub mod pending;
pub mod repository;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use crate::access::PermissionStore;
use crate::container::ContainerEngine;
use crate::error::PlatformError;
use crate::execution::{ExecutionBridge, ExecutionOutcome};
use crate::kernel::runtime::RuntimeRegistry;
use crate::primitives::{MonitoringEvent, ScheduledEvent};
use crate::types::{LambdaId, UserId};

pub use base::Lambda;
pub use decorator::{Decorated, LambdaLayer, MonitoringLayer, NoopLayer, PermissionLayer};
pub use factory::LambdaFactory;
pub use pending::PendingExecution;
pub use repository::LambdaRepository;

/// The lifecycle and execution surface shared by the base lambda and every
/// decorator.
pub trait AbstractLambda: Send + Sync {
    fn id(&self) -> LambdaId;
    fn name(&self) -> Option<&str>;
    fn owner(&self) -> Option<UserId>;
    /// Name of the selected runtime.
    fn runtime(&self) -> Option<&str>;
    fn is_async(&self) -> bool;
    /// Whether the lambda is persisted and not deleted.
    fn is_saved(&self) -> bool;

    /// Only allowed before the first save.
    fn set_name(&mut self, name: &str) -> Result<(), PlatformError>;
    /// Only allowed before the first save.
    fn set_owner(&mut self, owner: UserId) -> Result<(), PlatformError>;
    fn set_runtime(&mut self, runtime: &str) -> Result<(), PlatformError>;
    fn set_async(&mut self, is_async: bool);

    /// Stages a new artifact. The image is rebuilt by the next `save`/`update`.
    fn deploy_binary(&mut self, artifact: Vec<u8>) -> Result<(), PlatformError>;
    fn save(&mut self) -> Result<(), PlatformError>;
    fn update(&mut self) -> Result<(), PlatformError>;
    /// Terminal: every later operation fails with `LambdaNotFound`.
    fn delete(&mut self) -> Result<(), PlatformError>;

    /// Blocks until the outcome is available. `Err` means the execution never
    /// started; anything that happens once it has is reported in the outcome.
    fn execute_sync(&self, parameters: &str) -> Result<ExecutionOutcome, PlatformError>;
    /// Hands the execution to the tokio blocking pool and returns immediately.
    fn execute_async(&self, parameters: &str) -> Result<PendingExecution, PlatformError>;

    fn schedule(&mut self, event: ScheduledEvent) -> Result<(), PlatformError>;
    fn scheduled_event(&self, name: &str) -> Result<Option<ScheduledEvent>, PlatformError>;
    fn scheduled_events(&self) -> Result<Vec<ScheduledEvent>, PlatformError>;
    fn monitoring_events(&self) -> Result<Vec<MonitoringEvent>, PlatformError>;

    /// The base lambda at the bottom of the chain.
    fn undecorated(&self) -> &Lambda;
}

/// Shared collaborators every lambda needs.
#[derive(Clone)]
pub struct LambdaServices {
    pub store: Arc<PermissionStore>,
    pub repository: Arc<LambdaRepository>,
    pub runtimes: Arc<RuntimeRegistry>,
    pub engine: Arc<dyn ContainerEngine>,
    pub bridge: ExecutionBridge,
    /// Parent directory for image build staging.
    pub staging_root: Option<PathBuf>,
}
