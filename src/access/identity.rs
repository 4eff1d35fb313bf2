//! Identity providers turn registration parameters into a user and its primary key.

use std::collections::HashMap;

use crate::access::store::PermissionStore;
use crate::error::PlatformError;
use crate::primitives::{Key, User};

pub trait IdentityProvider: Send + Sync {
    /// Name clients select the provider by.
    fn name(&self) -> &str;

    fn register(
        &self,
        store: &PermissionStore,
        parameters: &HashMap<String, String>,
    ) -> Result<(User, Key), PlatformError>;
}

/// Registers users by name without verifying anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIdentityProvider;

impl IdentityProvider for NullIdentityProvider {
    fn name(&self) -> &str {
        "null"
    }

    fn register(
        &self,
        store: &PermissionStore,
        parameters: &HashMap<String, String>,
    ) -> Result<(User, Key), PlatformError> {
        let name = parameters
            .get("name")
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PlatformError::InvalidRequest("missing parameter: name".to_string()))?;
        store.register_user(name)
    }
}
