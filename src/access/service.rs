//! Authentication and "who is calling" queries over a `Session`.

use std::sync::Arc;

use crate::access::session::Session;
use crate::access::store::PermissionStore;
use crate::error::PlatformError;
use crate::primitives::Key;
use crate::types::{PermissionType, Subject};

/// Binds credentials to sessions and answers authorization questions for them.
#[derive(Clone)]
pub struct AuthorizationService {
    store: Arc<PermissionStore>,
}

impl AuthorizationService {
    pub fn new(store: Arc<PermissionStore>) -> Self {
        AuthorizationService { store }
    }

    pub fn store(&self) -> &Arc<PermissionStore> {
        &self.store
    }

    /// Opens a fresh, unauthenticated session for one request.
    pub fn begin_session(&self) -> Session {
        Session::new()
    }

    /// Binds `key` to `session`, replacing any earlier binding.
    /// Fails if the key is no longer known to the store.
    pub fn authenticate(&self, session: &Session, key: &Key) -> Result<(), PlatformError> {
        let current = self
            .store
            .key(&key.id)
            .ok_or(PlatformError::AuthenticationFailed)?;
        tracing::debug!(session = %session.id(), key = %current.id, "authenticated by key");
        session.bind(current);
        Ok(())
    }

    /// Resolves an opaque token and binds the matching key.
    pub fn authenticate_token(&self, session: &Session, token: &str) -> Result<Key, PlatformError> {
        let key = self.store.key_by_token(token).ok_or_else(|| {
            tracing::warn!(session = %session.id(), "token did not resolve to a key");
            PlatformError::AuthenticationFailed
        })?;
        tracing::debug!(session = %session.id(), key = %key.id, "authenticated by token");
        session.bind(key.clone());
        Ok(key)
    }

    /// The key bound to `session`, if it still exists.
    pub fn current_key(&self, session: &Session) -> Option<Key> {
        let bound = session.current_key()?;
        self.store.key(&bound.id)
    }

    /// Like `current_key`, but failing with `NotAuthenticated`.
    pub fn require_key(&self, session: &Session) -> Result<Key, PlatformError> {
        self.current_key(session).ok_or(PlatformError::NotAuthenticated)
    }

    /// Checks that the session's key holds `kind` on `subject`.
    pub fn require(
        &self,
        session: &Session,
        subject: Subject,
        kind: PermissionType,
    ) -> Result<Key, PlatformError> {
        let key = self.require_key(session)?;
        self.store.require(&key, subject, kind)?;
        Ok(key)
    }
}
