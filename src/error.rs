//!
//! Error types for lifecycle and authorization operations.
//!
//! Execution-time failures are not errors: they travel as `ExecutionOutcome`
//! data (see `execution::outcome`).

use crate::config::ConfigError;
use crate::types::{PermissionType, Subject};

/// Errors raised synchronously by lifecycle, authorization and deployment calls.
/// None of them leaves a partial mutation behind.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The credential or token does not resolve to a known key.
    #[error("Authentication failed")]
    AuthenticationFailed,
    /// No key is bound to the calling session.
    #[error("Not authenticated")]
    NotAuthenticated,
    /// The acting key lacks the capability the operation requires.
    #[error("Insufficient permissions: {permission} on {subject} required")]
    InsufficientPermissions {
        subject: Subject,
        permission: PermissionType,
    },
    /// Bad runtime selection, missing or empty artifact, or a lambda that is
    /// missing fields required for persistence.
    #[error("Invalid lambda definition: {0}")]
    InvalidLambdaDefinition(String),
    #[error("Lambda {name} already exists for owner {owner}")]
    DuplicateLambda { owner: String, name: String },
    #[error("Lambda not found: {0}")]
    LambdaNotFound(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("User already exists: {0}")]
    DuplicateUser(String),
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    /// A request that is well-formed but not allowed by the model.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The container engine rejected an image build.
    #[error("Image build failed: {0}")]
    ImageBuildFailed(String),
    /// The container engine failed outside of a build.
    #[error("Container engine error: {0}")]
    Container(String),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The caller's execution environment cannot run the operation
    /// (for example no async runtime is available).
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl PlatformError {
    /// HTTP-adjacent status code for transport layers.
    pub fn status_code(&self) -> u16 {
        match self {
            PlatformError::AuthenticationFailed | PlatformError::NotAuthenticated => 401,
            PlatformError::InsufficientPermissions { .. } => 403,
            PlatformError::LambdaNotFound(_)
            | PlatformError::UserNotFound(_)
            | PlatformError::KeyNotFound(_) => 404,
            PlatformError::DuplicateLambda { .. } | PlatformError::DuplicateUser(_) => 409,
            PlatformError::InvalidLambdaDefinition(_) | PlatformError::InvalidRequest(_) => 400,
            PlatformError::ImageBuildFailed(_)
            | PlatformError::Container(_)
            | PlatformError::Config(_)
            | PlatformError::Runtime(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LambdaId;

    #[test]
    fn insufficient_permissions_names_the_missing_capability() {
        let err = PlatformError::InsufficientPermissions {
            subject: Subject::Lambda(LambdaId::new()),
            permission: PermissionType::Execute,
        };
        let message = err.to_string();
        assert!(message.contains("EXECUTE"));
        assert!(message.contains("lambda:"));
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn status_codes_separate_client_and_server_errors() {
        assert_eq!(PlatformError::AuthenticationFailed.status_code(), 401);
        assert_eq!(PlatformError::LambdaNotFound("x".into()).status_code(), 404);
        assert_eq!(
            PlatformError::DuplicateLambda { owner: "u".into(), name: "x".into() }.status_code(),
            409
        );
        assert_eq!(PlatformError::ImageBuildFailed("boom".into()).status_code(), 500);
    }
}
