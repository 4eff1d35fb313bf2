use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand_core::{OsRng, RngCore};

use crate::container::ImageHandle;
use crate::types::{KeyId, LambdaId, PermissionType, Subject, UserId};

// --- Identity ---------------------------------------------------------------

/// A registered identity. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub primary_key: KeyId,
}

/// A credential owned by exactly one user.
///
/// The secret token is what clients present to authenticate; it is never
/// printed by `Debug`.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Key {
    pub id: KeyId,
    pub name: String,
    pub user: UserId,
    pub primary: bool,
    secret: String,
}

impl Key {
    /// Creates a key with a fresh 256-bit secret from the OS RNG.
    pub fn generate(user: UserId, name: &str, primary: bool) -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let secret = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Key {
            id: KeyId::new(),
            name: name.to_string(),
            user,
            primary,
            secret,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("primary", &self.primary)
            .finish_non_exhaustive()
    }
}

// --- Permissions ------------------------------------------------------------

/// A (grantee, subject, kind) capability triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Permission {
    pub grantee: KeyId,
    pub subject: Subject,
    pub kind: PermissionType,
}

// --- Lambdas ----------------------------------------------------------------

/// The persisted form of a lambda.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LambdaRecord {
    pub id: LambdaId,
    pub name: String,
    pub owner: UserId,
    pub runtime: String,
    pub is_async: bool,
    #[serde(with = "serde_bytes")]
    pub binary: Vec<u8>,
    /// Image built from the current binary. Replaced on every redeploy.
    pub image: Option<ImageHandle>,
    /// Bumped on every successful update.
    pub version: u64,
}

/// Entry descriptor bundled inside a deployed artifact.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LambdaMetadata {
    /// Name the entry resolver looks the handler up by.
    pub class: String,
    pub method: String,
    #[serde(default)]
    pub parameter_type: Option<String>,
    #[serde(default)]
    pub has_parameter: bool,
}

impl LambdaMetadata {
    /// Checks that the parameter declaration is self-consistent.
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.class.trim().is_empty() || self.method.trim().is_empty() {
            return Err("entry class and method must be non-empty".to_string());
        }
        match (self.has_parameter, self.parameter_type.as_deref()) {
            (true, None) | (true, Some("")) => {
                Err("has_parameter is set but no parameter_type is declared".to_string())
            }
            (false, Some(ty)) if !ty.is_empty() => Err(format!(
                "parameter_type {} is declared but has_parameter is false",
                ty
            )),
            _ => Ok(()),
        }
    }
}

// --- Schedules & monitoring -------------------------------------------------

/// A named trigger attached to a lambda. Triggering is done elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScheduledEvent {
    pub name: String,
    pub cron_expression: String,
    /// JSON parameter handed to the lambda on every trigger.
    pub parameters: String,
    /// Key the trigger executes as.
    pub key: KeyId,
}

/// Outcome classes recorded by monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Success,
    UserFailure,
    PlatformFailure,
}

/// One recorded execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MonitoringEvent {
    pub lambda: LambdaId,
    pub key: Option<KeyId>,
    pub started_at_ms: u64,
    pub duration_ms: u64,
    pub outcome: OutcomeClass,
    pub asynchronous: bool,
}

/// Milliseconds since the Unix epoch, saturating at zero for clocks set before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
