//!
//! Permission algebra.
//! Maps `PermissionType` onto bits of a `PermissionMask`, applies the implication
//! rules and decides which kind every lambda operation requires.

use std::fmt;

use crate::types::PermissionType;

/// One bit per `PermissionType`, at the position given by its discriminant.
pub type PermissionMask = u8;

/// Bits above the defined kinds must stay zero.
pub const DEFINED_BITS: PermissionMask = 0b0011_1111;

/// Returns the single-bit mask for `kind`.
#[inline]
pub fn bit(kind: PermissionType) -> PermissionMask {
    1 << (kind as u8)
}

/// Collects kinds into a mask.
pub fn mask_of<I: IntoIterator<Item = PermissionType>>(kinds: I) -> PermissionMask {
    kinds.into_iter().fold(0, |mask, kind| mask | bit(kind))
}

/// Expands the kinds contained in `mask`, in declaration order.
pub fn kinds(mask: PermissionMask) -> impl Iterator<Item = PermissionType> {
    PermissionType::ALL
        .into_iter()
        .filter(move |kind| mask & bit(*kind) != 0)
}

/// Adds implied kinds to a mask. UPDATE implies READ; nothing else is implied.
#[inline]
pub fn canonicalise(mask: PermissionMask) -> PermissionMask {
    let mut m = mask & DEFINED_BITS;
    if m & bit(PermissionType::Update) != 0 {
        m |= bit(PermissionType::Read);
    }
    m
}

/// Checks whether `have` covers every kind in `need`, after canonicalisation.
#[inline]
pub fn sufficient(have: PermissionMask, need: PermissionMask) -> bool {
    (canonicalise(have) & need) == need
}

/// Operations exposed by a lambda that can be authorization-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LambdaOperation {
    Save,
    Update,
    Delete,
    DeployBinary,
    ExecuteSync,
    ExecuteAsync,
    Schedule,
    ReadSchedule,
    ReadMonitoring,
}

impl LambdaOperation {
    /// The kind required on a persisted lambda.
    pub fn required_permission(self) -> PermissionType {
        match self {
            LambdaOperation::Save => PermissionType::Create,
            LambdaOperation::Update
            | LambdaOperation::DeployBinary
            | LambdaOperation::Schedule => PermissionType::Update,
            LambdaOperation::Delete => PermissionType::Delete,
            LambdaOperation::ExecuteSync | LambdaOperation::ExecuteAsync => {
                PermissionType::Execute
            }
            LambdaOperation::ReadSchedule | LambdaOperation::ReadMonitoring => {
                PermissionType::Read
            }
        }
    }

    /// Whether the operation can run before the lambda has been saved.
    /// Such operations are checked as CREATE on the owning user.
    pub fn allowed_before_save(self) -> bool {
        matches!(self, LambdaOperation::Save | LambdaOperation::DeployBinary)
    }
}

impl fmt::Display for LambdaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LambdaOperation::Save => "save",
            LambdaOperation::Update => "update",
            LambdaOperation::Delete => "delete",
            LambdaOperation::DeployBinary => "deploy_binary",
            LambdaOperation::ExecuteSync => "execute_sync",
            LambdaOperation::ExecuteAsync => "execute_async",
            LambdaOperation::Schedule => "schedule",
            LambdaOperation::ReadSchedule => "read_schedule",
            LambdaOperation::ReadMonitoring => "read_monitoring",
        };
        f.write_str(name)
    }
}
