//! Shared fixtures for the lambda module tests.

use std::sync::Arc;

use crate::access::{AuthorizationService, PermissionStore};
use crate::config::{ExecutionConfig, RuntimeConfig};
use crate::container::InMemoryEngine;
use crate::execution::{ArtifactBuilder, ExecutionBridge, HandlerRegistry};
use crate::kernel::runtime::RuntimeRegistry;
use crate::lambda::{LambdaRepository, LambdaServices};
use crate::primitives::{Key, LambdaMetadata, User};

pub(crate) struct Fixture {
    pub services: LambdaServices,
    pub engine: Arc<InMemoryEngine>,
    pub auth: AuthorizationService,
    pub owner: User,
    pub owner_key: Key,
}

pub(crate) fn fixture() -> Fixture {
    let mut handlers = HandlerRegistry::new();
    handlers.register("Greeter", "greet", "Name", |name: String| {
        Ok::<_, String>(format!("hello {}", name))
    });
    let engine = Arc::new(InMemoryEngine::new(Arc::new(handlers)));
    let store = Arc::new(PermissionStore::new());
    let (owner, owner_key) = store.register_user("owner").unwrap();
    let services = LambdaServices {
        store: store.clone(),
        repository: Arc::new(LambdaRepository::new()),
        runtimes: Arc::new(RuntimeRegistry::from_config(&[RuntimeConfig::native()]).unwrap()),
        engine: engine.clone(),
        bridge: ExecutionBridge::new(engine.clone(), &ExecutionConfig::default()),
        staging_root: None,
    };
    Fixture {
        services,
        engine,
        auth: AuthorizationService::new(store),
        owner,
        owner_key,
    }
}

/// An artifact resolving to `Greeter.greet(Name)`.
pub(crate) fn greeter() -> Vec<u8> {
    ArtifactBuilder::new(&LambdaMetadata {
        class: "Greeter".into(),
        method: "greet".into(),
        parameter_type: Some("Name".into()),
        has_parameter: true,
    })
    .unwrap()
    .finish()
    .unwrap()
}
