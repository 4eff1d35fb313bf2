//! Execution outcomes and their wire form.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::primitives::OutcomeClass;

/// Why the platform, rather than the user's code, failed an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformFailureKind {
    /// Metadata missing or inconsistent, or the entry could not be resolved.
    InvalidLambdaDefinition,
    /// The request parameter does not fit the declared parameter type.
    InvalidParameter,
    /// Engine or stream failure.
    Io,
    Timeout,
    /// The container answered with bytes that are not an outcome.
    MalformedResponse,
    Internal,
}

impl fmt::Display for PlatformFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlatformFailureKind::InvalidLambdaDefinition => "invalid lambda definition",
            PlatformFailureKind::InvalidParameter => "invalid parameter",
            PlatformFailureKind::Io => "io",
            PlatformFailureKind::Timeout => "timeout",
            PlatformFailureKind::MalformedResponse => "malformed response",
            PlatformFailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Result of one execution attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// `None` is a void return.
    Success(Option<Value>),
    /// The user's code failed; `message` is its own description of the failure.
    UserFailure { message: String },
    PlatformFailure {
        kind: PlatformFailureKind,
        message: String,
    },
}

impl ExecutionOutcome {
    pub fn platform(kind: PlatformFailureKind, message: impl Into<String>) -> Self {
        ExecutionOutcome::PlatformFailure {
            kind,
            message: message.into(),
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        ExecutionOutcome::UserFailure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ExecutionOutcome::Success(v) => v.as_ref(),
            _ => None,
        }
    }

    pub fn class(&self) -> OutcomeClass {
        match self {
            ExecutionOutcome::Success(_) => OutcomeClass::Success,
            ExecutionOutcome::UserFailure { .. } => OutcomeClass::UserFailure,
            ExecutionOutcome::PlatformFailure { .. } => OutcomeClass::PlatformFailure,
        }
    }

    /// HTTP-adjacent status: 200, 502 for user failures, 500 for platform failures.
    pub fn status_code(&self) -> u16 {
        match self {
            ExecutionOutcome::Success(_) => 200,
            ExecutionOutcome::UserFailure { .. } => 502,
            ExecutionOutcome::PlatformFailure { .. } => 500,
        }
    }
}

// --- Wire form --------------------------------------------------------------

/// Error kinds the entrypoint reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    User,
    InvalidDefinition,
    InvalidParameter,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescription {
    pub kind: ErrorKind,
    pub message: String,
}

/// Response body written by the entrypoint. At most one field is populated;
/// both empty is a void success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReturnValue {
    /// JSON text of the returned value.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorDescription>,
}

impl ExecutionReturnValue {
    pub fn void() -> Self {
        ExecutionReturnValue::default()
    }

    pub fn value(value: &Value) -> Self {
        ExecutionReturnValue {
            value: Some(value.to_string()),
            error: None,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ExecutionReturnValue {
            value: None,
            error: Some(ErrorDescription {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Plain struct of strings; serialisation cannot fail.
        serde_json::to_vec(self).unwrap_or_else(|_| b"{}".to_vec())
    }

    pub fn into_outcome(self) -> ExecutionOutcome {
        match (self.value, self.error) {
            (Some(_), Some(_)) => ExecutionOutcome::platform(
                PlatformFailureKind::MalformedResponse,
                "response carries both a value and an error",
            ),
            (None, None) => ExecutionOutcome::Success(None),
            (Some(text), None) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => ExecutionOutcome::Success(Some(value)),
                Err(e) => ExecutionOutcome::platform(
                    PlatformFailureKind::MalformedResponse,
                    format!("returned value is not JSON: {}", e),
                ),
            },
            (None, Some(ErrorDescription { kind, message })) => match kind {
                ErrorKind::User => ExecutionOutcome::UserFailure { message },
                ErrorKind::InvalidDefinition => {
                    ExecutionOutcome::platform(PlatformFailureKind::InvalidLambdaDefinition, message)
                }
                ErrorKind::InvalidParameter => {
                    ExecutionOutcome::platform(PlatformFailureKind::InvalidParameter, message)
                }
                ErrorKind::Internal => {
                    ExecutionOutcome::platform(PlatformFailureKind::Internal, message)
                }
            },
        }
    }
}

/// Decodes a response frame payload. Anything that is not a well-formed
/// outcome object becomes a `MalformedResponse` platform failure.
pub fn decode_response(payload: &[u8]) -> ExecutionOutcome {
    match serde_json::from_slice::<ExecutionReturnValue>(payload) {
        Ok(wire) => wire.into_outcome(),
        Err(e) => ExecutionOutcome::platform(
            PlatformFailureKind::MalformedResponse,
            format!("undecodable response: {}", e),
        ),
    }
}
