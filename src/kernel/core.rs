//!
//! The platform kernel: wires configuration, the permission store, the
//! runtime registry and the container engine into the services handed to
//! every session's lambda factory.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::access::{AuthorizationService, IdentityProvider, NullIdentityProvider, PermissionStore, Session};
use crate::config::PlatformConfig;
use crate::container::{ContainerEngine, DockerEngine};
use crate::error::PlatformError;
use crate::execution::ExecutionBridge;
use crate::kernel::runtime::RuntimeRegistry;
use crate::lambda::{LambdaFactory, LambdaRepository, LambdaServices};
use crate::primitives::{Key, User};

/// One platform instance. Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Kernel {
    config: PlatformConfig,
    auth: AuthorizationService,
    services: LambdaServices,
    providers: RwLock<HashMap<String, Arc<dyn IdentityProvider>>>,
}

impl Kernel {
    /// Builds a kernel over `engine`. The configuration is validated first.
    pub fn new(config: PlatformConfig, engine: Arc<dyn ContainerEngine>) -> Result<Self, PlatformError> {
        config.validate()?;
        let runtimes = Arc::new(RuntimeRegistry::from_config(&config.runtimes)?);
        let store = Arc::new(PermissionStore::new());
        let services = LambdaServices {
            store: store.clone(),
            repository: Arc::new(LambdaRepository::new()),
            runtimes,
            bridge: ExecutionBridge::new(engine.clone(), &config.execution),
            engine,
            staging_root: config.staging_dir.clone(),
        };
        let kernel = Kernel {
            auth: AuthorizationService::new(store),
            services,
            providers: RwLock::new(HashMap::new()),
            config,
        };
        kernel.register_identity_provider(Arc::new(NullIdentityProvider));
        tracing::info!(
            runtimes = ?kernel.services.runtimes.names().collect::<Vec<_>>(),
            timeout_ms = kernel.config.execution.timeout_ms,
            "kernel ready"
        );
        Ok(kernel)
    }

    /// Builds a kernel driving the docker CLI, after checking the daemon answers.
    pub fn with_docker(config: PlatformConfig) -> Result<Self, PlatformError> {
        let engine = DockerEngine::new(&config.docker);
        engine.ping()?;
        Self::new(config, Arc::new(engine))
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn authorization(&self) -> &AuthorizationService {
        &self.auth
    }

    pub fn store(&self) -> &Arc<PermissionStore> {
        &self.services.store
    }

    pub fn runtimes(&self) -> &Arc<RuntimeRegistry> {
        &self.services.runtimes
    }

    pub fn repository(&self) -> &Arc<LambdaRepository> {
        &self.services.repository
    }

    // --- Identity ------------------------------------------------------------

    /// Adds or replaces the provider registered under `provider.name()`.
    pub fn register_identity_provider(&self, provider: Arc<dyn IdentityProvider>) {
        let name = provider.name().to_string();
        tracing::debug!(provider = %name, "identity provider registered");
        self.providers.write().insert(name, provider);
    }

    /// Registers a user through the named provider.
    pub fn register_user(
        &self,
        provider: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<(User, Key), PlatformError> {
        let provider = self
            .providers
            .read()
            .get(provider)
            .cloned()
            .ok_or_else(|| PlatformError::InvalidRequest(format!("unknown identity provider: {}", provider)))?;
        let (user, key) = provider.register(&self.services.store, parameters)?;
        tracing::info!(user = %user.id, provider = provider.name(), "user registered");
        Ok((user, key))
    }

    // --- Sessions ------------------------------------------------------------

    /// Opens an unauthenticated session for one request.
    pub fn begin_session(&self) -> Session {
        self.auth.begin_session()
    }

    /// A factory whose lambdas act with `session`'s identity.
    pub fn lambda_factory(&self, session: &Session) -> LambdaFactory {
        LambdaFactory::new(self.services.clone(), self.auth.clone(), session.clone())
    }
}
