//! Shared identifier and tag types.
//!
//! Identifiers are UUID newtypes so a `KeyId` can never be passed where a
//! `LambdaId` is expected. `PermissionType` is the closed set of capability
//! kinds; `PermissionMask` (see `rights`) is the bitset form stored by the
//! permission store.

use std::fmt;

use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

uuid_id!(
    /// Identifies a registered user.
    UserId
);
uuid_id!(
    /// Identifies a credential.
    KeyId
);
uuid_id!(
    /// Identifies a persisted lambda. Assigned on first save.
    LambdaId
);

/// Capability kinds a key can hold on a subject.
///
/// The discriminant is the bit position inside a `PermissionMask`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionType {
    Create = 0,
    Read = 1,
    Update = 2,
    Delete = 3,
    Execute = 4,
    Grant = 5,
}

impl PermissionType {
    pub const ALL: [PermissionType; 6] = [
        PermissionType::Create,
        PermissionType::Read,
        PermissionType::Update,
        PermissionType::Delete,
        PermissionType::Execute,
        PermissionType::Grant,
    ];
}

impl TryFrom<u8> for PermissionType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PermissionType::Create),
            1 => Ok(PermissionType::Read),
            2 => Ok(PermissionType::Update),
            3 => Ok(PermissionType::Delete),
            4 => Ok(PermissionType::Execute),
            5 => Ok(PermissionType::Grant),
            _ => Err(format!("Invalid PermissionType tag: {}", value)),
        }
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionType::Create => "CREATE",
            PermissionType::Read => "READ",
            PermissionType::Update => "UPDATE",
            PermissionType::Delete => "DELETE",
            PermissionType::Execute => "EXECUTE",
            PermissionType::Grant => "GRANT",
        };
        f.write_str(name)
    }
}

/// Anything a permission can be held on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Subject {
    User(UserId),
    Lambda(LambdaId),
    Key(KeyId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user:{}", id),
            Subject::Lambda(id) => write!(f, "lambda:{}", id),
            Subject::Key(id) => write!(f, "key:{}", id),
        }
    }
}
