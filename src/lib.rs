#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(deprecated)]

//!
//! SmartLambda core: a multi-tenant platform for user-deployed functions.
//!
//! Users deploy artifacts as lambdas, grant each other capabilities on them,
//! and execute them in isolated containers. Every lambda handed out by a
//! [`LambdaFactory`] is wrapped in a permission check and execution
//! monitoring; the container side speaks a length-prefixed JSON protocol
//! with the `lambda-entrypoint` binary.

// Identifier and tag types shared by every module.
pub mod types;

// Plain data records: users, keys, permissions, lambda records, events.
pub mod primitives;

// Permission bitmask algebra and the operation -> permission mapping.
pub mod rights;

pub mod error;

pub mod config;

pub mod logging;

// Sessions, authentication and the grant store.
pub mod access;

// Image building and container engines.
pub mod container;

// Framing, outcomes, artifacts, the bridge and the entrypoint.
pub mod execution;

// Lambdas and their decorator chain.
pub mod lambda;

// Composition root and runtime registry.
pub mod kernel;

pub use access::{AuthorizationService, IdentityProvider, NullIdentityProvider, PermissionStore, Session};
pub use config::PlatformConfig;
pub use error::PlatformError;
pub use execution::{ExecutionBridge, ExecutionOutcome, PlatformFailureKind};
pub use kernel::Kernel;
pub use lambda::{AbstractLambda, LambdaFactory, PendingExecution};
pub use primitives::{Key, LambdaMetadata, MonitoringEvent, OutcomeClass, Permission, ScheduledEvent, User};
pub use types::{KeyId, LambdaId, PermissionType, Subject, UserId};
