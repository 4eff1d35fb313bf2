//! Access control: request sessions, authentication, and the grant store.

pub mod identity;
pub mod service;
pub mod session;
pub mod store;

pub use identity::{IdentityProvider, NullIdentityProvider};
pub use service::AuthorizationService;
pub use session::Session;
pub use store::PermissionStore;
