//! Request-scoped identity context.
//!
//! A `Session` is created when a request starts and is handed explicitly to
//! every component that needs the caller's identity. Clones share one binding,
//! so a continuation moved onto another thread (for example an async execution)
//! keeps seeing the identity of the request that spawned it. Separate sessions
//! never share a binding.

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::primitives::Key;

/// Identity binding for one logical request.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionState>,
}

struct SessionState {
    id: Uuid,
    binding: RwLock<Option<Key>>,
}

impl Session {
    pub(crate) fn new() -> Self {
        let session = Session {
            inner: Arc::new(SessionState {
                id: Uuid::new_v4(),
                binding: RwLock::new(None),
            }),
        };
        tracing::debug!(session = %session.id(), "session started");
        session
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Replaces the current binding.
    pub(crate) fn bind(&self, key: Key) {
        *self.inner.binding.write() = Some(key);
    }

    /// The key bound to this session, as it was when bound.
    pub fn current_key(&self) -> Option<Key> {
        self.inner.binding.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.binding.read().is_some()
    }

    /// Clears the binding. Called when the request completes; later
    /// calls through any clone of this session observe no identity.
    pub fn end(&self) {
        self.inner.binding.write().take();
        tracing::debug!(session = %self.id(), "session ended");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("key", &self.inner.binding.read().as_ref().map(|k| k.id))
            .finish()
    }
}
