//! Container-side half of the execution protocol.
//!
//! The entrypoint reads one request frame, resolves the entry declared by the
//! artifact's metadata, invokes it and writes one response frame. Failures to
//! resolve the entry are reported as invalid definitions; failures raised by
//! the entry itself are reported as user failures.

use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;

use crate::execution::artifact::{self, ArtifactError};
use crate::execution::frame::{self, FrameError};
use crate::execution::outcome::{ErrorKind, ExecutionReturnValue};
use crate::primitives::LambdaMetadata;

pub const DEFAULT_MAX_REQUEST_BYTES: u32 = 16 * 1024 * 1024;

/// The declared entry cannot be found or does not match its declaration.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("entry class {0} not found")]
    UnknownClass(String),
    #[error("entry method {method} not found on {class}")]
    UnknownMethod { class: String, method: String },
    #[error("entry {class}.{method} takes {actual}, metadata declares {declared}")]
    ParameterMismatch {
        class: String,
        method: String,
        declared: String,
        actual: String,
    },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Failure raised while the resolved entry runs.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The user's code failed. The message is passed back verbatim.
    #[error("{0}")]
    User(String),
    #[error("parameter does not match the declared type: {0}")]
    InvalidParameter(String),
    #[error("internal entrypoint failure: {0}")]
    Internal(String),
}

/// Symbol lookup: finds the callable an artifact declares.
pub trait EntryResolver {
    fn resolve<'a>(
        &'a self,
        artifact: &[u8],
        metadata: &LambdaMetadata,
    ) -> Result<Box<dyn EntryPoint + 'a>, ResolutionError>;
}

/// A resolved entry. `parameter` is `None` when the metadata declares none.
pub trait EntryPoint {
    fn invoke(&self, parameter: Option<&Value>) -> Result<Option<Value>, InvocationError>;
}

impl<R: EntryResolver + ?Sized> EntryResolver for Arc<R> {
    fn resolve<'a>(
        &'a self,
        artifact: &[u8],
        metadata: &LambdaMetadata,
    ) -> Result<Box<dyn EntryPoint + 'a>, ResolutionError> {
        (**self).resolve(artifact, metadata)
    }
}

pub struct Entrypoint<R> {
    resolver: R,
    max_request_bytes: u32,
}

impl<R: EntryResolver> Entrypoint<R> {
    pub fn new(resolver: R) -> Self {
        Entrypoint {
            resolver,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }

    pub fn with_max_request_bytes(mut self, max: u32) -> Self {
        self.max_request_bytes = max;
        self
    }

    /// Runs one exchange. Only a failure to write the response is an error;
    /// everything else is reported inside the response.
    pub fn run<I, O>(
        &self,
        artifact: &[u8],
        input: &mut I,
        output: &mut O,
    ) -> Result<ExecutionReturnValue, FrameError>
    where
        I: Read + ?Sized,
        O: Write + ?Sized,
    {
        let response = self.handle(artifact, input);
        if let Some(error) = &response.error {
            tracing::info!(kind = ?error.kind, message = %error.message, "execution failed");
        }
        frame::write_frame(output, &response.encode())?;
        Ok(response)
    }

    fn handle<I: Read + ?Sized>(&self, artifact: &[u8], input: &mut I) -> ExecutionReturnValue {
        let request = match frame::read_frame(input, self.max_request_bytes) {
            Ok(bytes) => bytes,
            Err(e) => {
                return ExecutionReturnValue::error(
                    ErrorKind::Internal,
                    format!("could not read request: {}", e),
                )
            }
        };

        let metadata = match artifact::read_metadata(artifact) {
            Ok(metadata) => metadata,
            Err(e) => return ExecutionReturnValue::error(ErrorKind::InvalidDefinition, e.to_string()),
        };
        tracing::debug!(class = %metadata.class, method = %metadata.method, "resolving entry");

        let entry = match self.resolver.resolve(artifact, &metadata) {
            Ok(entry) => entry,
            Err(e) => return ExecutionReturnValue::error(ErrorKind::InvalidDefinition, e.to_string()),
        };

        let parameter = if metadata.has_parameter {
            match parse_parameter(&request) {
                Ok(value) => Some(value),
                Err(message) => {
                    return ExecutionReturnValue::error(ErrorKind::InvalidParameter, message)
                }
            }
        } else {
            None
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| entry.invoke(parameter.as_ref())));
        match result {
            Ok(Ok(Some(value))) => ExecutionReturnValue::value(&value),
            Ok(Ok(None)) => ExecutionReturnValue::void(),
            Ok(Err(InvocationError::User(message))) => {
                ExecutionReturnValue::error(ErrorKind::User, message)
            }
            Ok(Err(e @ InvocationError::InvalidParameter(_))) => {
                ExecutionReturnValue::error(ErrorKind::InvalidParameter, e.to_string())
            }
            Ok(Err(e @ InvocationError::Internal(_))) => {
                ExecutionReturnValue::error(ErrorKind::Internal, e.to_string())
            }
            Err(payload) => ExecutionReturnValue::error(ErrorKind::User, panic_message(&*payload)),
        }
    }
}

fn parse_parameter(request: &[u8]) -> Result<Value, String> {
    if request.is_empty() {
        return Err("a parameter is declared but the request is empty".to_string());
    }
    serde_json::from_slice(request).map_err(|e| format!("request is not JSON: {}", e))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "entry panicked".to_string()
    }
}

// --- Process resolver -------------------------------------------------------

/// Resolves the entry class to an executable inside the unpacked artifact.
///
/// The method name is passed as the first argument and the parameter JSON on
/// stdin. Stdout is the returned JSON value (empty for void). A non-zero exit
/// is a user failure carrying stderr.
#[derive(Debug, Default, Clone)]
pub struct ProcessResolver {
    /// Where artifacts are unpacked. Defaults to the OS temp dir.
    scratch_root: Option<PathBuf>,
}

impl ProcessResolver {
    pub fn new() -> Self {
        ProcessResolver::default()
    }

    pub fn with_scratch_root(root: impl Into<PathBuf>) -> Self {
        ProcessResolver {
            scratch_root: Some(root.into()),
        }
    }
}

struct ProcessEntry {
    // Keeps the unpacked artifact alive until the entry is dropped.
    workdir: TempDir,
    executable: PathBuf,
    method: String,
}

impl EntryResolver for ProcessResolver {
    fn resolve<'a>(
        &'a self,
        artifact: &[u8],
        metadata: &LambdaMetadata,
    ) -> Result<Box<dyn EntryPoint + 'a>, ResolutionError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("lambda-");
        let workdir = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(ArtifactError::Io)?;
        artifact::unpack(artifact, workdir.path())?;

        let relative = Path::new(&metadata.class);
        if relative.is_absolute() || metadata.class.split('/').any(|c| c == "..") {
            return Err(ResolutionError::UnknownClass(metadata.class.clone()));
        }
        let executable = workdir.path().join(relative);
        if !is_executable(&executable) {
            return Err(ResolutionError::UnknownClass(metadata.class.clone()));
        }
        Ok(Box::new(ProcessEntry {
            workdir,
            executable,
            method: metadata.method.clone(),
        }))
    }
}

// "Text file busy": another thread forked while the artifact was being written.
const ETXTBSY: i32 = 26;

impl ProcessEntry {
    fn spawn(&self) -> io::Result<Child> {
        let mut attempts = 0;
        loop {
            let spawned = Command::new(&self.executable)
                .arg(&self.method)
                .current_dir(self.workdir.path())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn();
            match spawned {
                Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempts < 5 => {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(10 * attempts));
                }
                other => return other,
            }
        }
    }
}

impl EntryPoint for ProcessEntry {
    fn invoke(&self, parameter: Option<&Value>) -> Result<Option<Value>, InvocationError> {
        let mut child = self
            .spawn()
            .map_err(|e| InvocationError::Internal(format!("spawn {}: {}", self.executable.display(), e)))?;

        // stdin is fed from its own thread while both output pipes drain,
        // otherwise an entry that echoes its input fills stdout and stalls.
        let stdin = child.stdin.take();
        let payload = parameter.map(|value| value.to_string().into_bytes());
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || match (stdin, payload) {
                (Some(mut stdin), Some(payload)) => match stdin.write_all(&payload) {
                    Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                },
                _ => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("parameter writer panicked")));
            (written, output)
        });
        let output = output.map_err(|e| InvocationError::Internal(format!("wait for entry: {}", e)))?;
        written.map_err(|e| InvocationError::Internal(format!("write parameter: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("entry exited with {}", output.status)
            } else {
                stderr
            };
            return Err(InvocationError::User(message));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(stdout)
            .map(Some)
            .map_err(|e| InvocationError::User(format!("entry output is not JSON: {}", e)))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::artifact::ArtifactBuilder;
    use crate::execution::handlers::HandlerRegistry;
    use crate::execution::outcome::{decode_response, ExecutionOutcome, PlatformFailureKind};
    use serde_json::json;

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("Calc", "add", "Pair", |p: (i64, i64)| Ok::<_, String>(p.0 + p.1));
        registry.register("Calc", "fail", "Pair", |p: (i64, i64)| {
            Err::<i64, _>(format!("boom {}", p.0))
        });
        registry.register_without_parameter("Calc", "ping", || Ok::<_, String>("pong"));
        registry.register_without_parameter("Calc", "explode", || -> Result<(), String> {
            panic!("kaboom")
        });
        registry
    }

    fn artifact(method: &str, parameter: Option<&str>) -> Vec<u8> {
        let metadata = LambdaMetadata {
            class: "Calc".into(),
            method: method.into(),
            parameter_type: parameter.map(str::to_string),
            has_parameter: parameter.is_some(),
        };
        ArtifactBuilder::new(&metadata).unwrap().finish().unwrap()
    }

    fn exchange(artifact: &[u8], request: &[u8]) -> ExecutionOutcome {
        let mut input = Vec::new();
        frame::write_frame(&mut input, request).unwrap();
        let mut output = Vec::new();
        Entrypoint::new(registry())
            .run(artifact, &mut input.as_slice(), &mut output)
            .unwrap();
        let payload = frame::read_frame(&mut output.as_slice(), 1 << 20).unwrap();
        decode_response(&payload)
    }

    #[test]
    fn typed_parameter_is_passed_through() {
        let outcome = exchange(&artifact("add", Some("Pair")), b"[2,3]");
        assert_eq!(outcome, ExecutionOutcome::Success(Some(json!(5))));
    }

    #[test]
    fn no_parameter_ignores_request_body() {
        let outcome = exchange(&artifact("ping", None), b"{}");
        assert_eq!(outcome, ExecutionOutcome::Success(Some(json!("pong"))));
    }

    #[test]
    fn user_error_is_a_user_failure() {
        let outcome = exchange(&artifact("fail", Some("Pair")), b"[7,0]");
        assert_eq!(outcome, ExecutionOutcome::user("boom 7"));
    }

    #[test]
    fn panic_is_a_user_failure() {
        let outcome = exchange(&artifact("explode", None), b"");
        assert_eq!(outcome, ExecutionOutcome::user("kaboom"));
    }

    #[test]
    fn unknown_method_is_an_invalid_definition() {
        let outcome = exchange(&artifact("mul", Some("Pair")), b"[1,2]");
        assert!(matches!(
            outcome,
            ExecutionOutcome::PlatformFailure { kind: PlatformFailureKind::InvalidLambdaDefinition, .. }
        ));
    }

    #[test]
    fn missing_metadata_is_an_invalid_definition() {
        let broken = ArtifactBuilder::without_metadata().finish().unwrap();
        let outcome = exchange(&broken, b"{}");
        assert!(matches!(
            outcome,
            ExecutionOutcome::PlatformFailure { kind: PlatformFailureKind::InvalidLambdaDefinition, .. }
        ));
    }

    #[test]
    fn malformed_parameter_is_rejected_before_invocation() {
        let outcome = exchange(&artifact("add", Some("Pair")), b"{\"x\":1}");
        assert!(matches!(
            outcome,
            ExecutionOutcome::PlatformFailure { kind: PlatformFailureKind::InvalidParameter, .. }
        ));
    }

    #[test]
    fn truncated_request_still_gets_a_response() {
        let mut output = Vec::new();
        let response = Entrypoint::new(registry())
            .run(&artifact("ping", None), &mut [0u8, 0].as_slice(), &mut output)
            .unwrap();
        assert_eq!(response.error.map(|e| e.kind), Some(ErrorKind::Internal));
        assert!(!output.is_empty());
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn script_artifact(script: &str, has_parameter: bool) -> Vec<u8> {
            let metadata = LambdaMetadata {
                class: "bin/handler".into(),
                method: "handle".into(),
                parameter_type: has_parameter.then(|| "Object".to_string()),
                has_parameter,
            };
            ArtifactBuilder::new(&metadata)
                .unwrap()
                .file("bin/handler", script.as_bytes(), true)
                .unwrap()
                .finish()
                .unwrap()
        }

        fn run_process(artifact: &[u8], request: &[u8]) -> ExecutionOutcome {
            let mut input = Vec::new();
            frame::write_frame(&mut input, request).unwrap();
            let mut output = Vec::new();
            Entrypoint::new(ProcessResolver::new())
                .run(artifact, &mut input.as_slice(), &mut output)
                .unwrap();
            decode_response(&frame::read_frame(&mut output.as_slice(), 1 << 20).unwrap())
        }

        #[test]
        fn method_is_first_argument_and_stdout_is_the_value() {
            let artifact = script_artifact("#!/bin/sh\nprintf '\"%s\"' \"$1\"\n", false);
            assert_eq!(run_process(&artifact, b""), ExecutionOutcome::Success(Some(json!("handle"))));
        }

        #[test]
        fn parameter_arrives_on_stdin() {
            let artifact = script_artifact("#!/bin/sh\ncat\n", true);
            assert_eq!(
                run_process(&artifact, br#"{"x":1}"#),
                ExecutionOutcome::Success(Some(json!({"x": 1})))
            );
        }

        #[test]
        fn large_parameter_echoed_back_does_not_stall() {
            let artifact = script_artifact("#!/bin/sh\ncat\n", true);
            let parameter = json!({ "blob": "x".repeat(512 * 1024) });
            assert_eq!(
                run_process(&artifact, parameter.to_string().as_bytes()),
                ExecutionOutcome::Success(Some(parameter))
            );
        }

        #[test]
        fn entry_ignoring_stdin_still_answers() {
            let artifact = script_artifact("#!/bin/sh\nprintf 7\n", true);
            let parameter = json!({ "blob": "x".repeat(256 * 1024) });
            assert_eq!(
                run_process(&artifact, parameter.to_string().as_bytes()),
                ExecutionOutcome::Success(Some(json!(7)))
            );
        }

        #[test]
        fn non_zero_exit_carries_stderr() {
            let artifact = script_artifact("#!/bin/sh\necho boom >&2\nexit 3\n", true);
            assert_eq!(run_process(&artifact, br#"{"x":1}"#), ExecutionOutcome::user("boom"));
        }

        #[test]
        fn missing_executable_is_an_invalid_definition() {
            let metadata = LambdaMetadata {
                class: "bin/absent".into(),
                method: "handle".into(),
                parameter_type: None,
                has_parameter: false,
            };
            let artifact = ArtifactBuilder::new(&metadata).unwrap().finish().unwrap();
            assert!(matches!(
                run_process(&artifact, b""),
                ExecutionOutcome::PlatformFailure { kind: PlatformFailureKind::InvalidLambdaDefinition, .. }
            ));
        }
    }
}
