//! Host side of the execution protocol.
//!
//! One attempt starts one container, writes one request frame, reads one
//! response frame and tears the container down. Every failure mode resolves
//! to an [`ExecutionOutcome`]; nothing here returns an error.

use std::io::{Read, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::container::{ContainerEngine, ContainerGuard, ImageHandle};
use crate::execution::frame::{self, FrameError};
use crate::execution::outcome::{decode_response, ExecutionOutcome, PlatformFailureKind};
use crate::primitives::OutcomeClass;

/// Per-attempt state. Terminal states are final; a retry is a new attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    ImageReady,
    ContainerRunning,
    Succeeded,
    UserFailed,
    PlatformFailed,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::UserFailed | ExecutionState::PlatformFailed
        )
    }

    fn can_advance_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        match (self, next) {
            (Idle, ImageReady) | (ImageReady, ContainerRunning) => true,
            (ImageReady, PlatformFailed) => true,
            (ContainerRunning, n) => n.is_terminal(),
            _ => false,
        }
    }

    fn for_outcome(outcome: &ExecutionOutcome) -> Self {
        match outcome.class() {
            OutcomeClass::Success => ExecutionState::Succeeded,
            OutcomeClass::UserFailure => ExecutionState::UserFailed,
            OutcomeClass::PlatformFailure => ExecutionState::PlatformFailed,
        }
    }
}

/// A finished execution attempt and the states it went through.
#[derive(Debug)]
pub struct ExecutionAttempt {
    id: Uuid,
    trail: Vec<ExecutionState>,
    outcome: ExecutionOutcome,
}

impl ExecutionAttempt {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ExecutionState {
        self.trail.last().copied().unwrap_or(ExecutionState::Idle)
    }

    pub fn trail(&self) -> &[ExecutionState] {
        &self.trail
    }

    pub fn outcome(&self) -> &ExecutionOutcome {
        &self.outcome
    }

    pub fn into_outcome(self) -> ExecutionOutcome {
        self.outcome
    }
}

struct Tracker {
    trail: Vec<ExecutionState>,
}

impl Tracker {
    fn advance(&mut self, next: ExecutionState) {
        let current = self.trail.last().copied().unwrap_or(ExecutionState::Idle);
        debug_assert!(current.can_advance_to(next), "{:?} -> {:?}", current, next);
        tracing::trace!(from = ?current, to = ?next, "execution state");
        self.trail.push(next);
    }
}

enum ExchangeError {
    Write(FrameError),
    Read(FrameError),
}

#[derive(Clone)]
pub struct ExecutionBridge {
    engine: Arc<dyn ContainerEngine>,
    timeout: Duration,
    max_response_bytes: u32,
}

impl ExecutionBridge {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: &ExecutionConfig) -> Self {
        ExecutionBridge {
            engine,
            timeout: config.timeout(),
            max_response_bytes: config.max_response_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn execute(&self, image: &ImageHandle, parameters: &str) -> ExecutionOutcome {
        self.attempt(image, parameters).into_outcome()
    }

    /// Runs one attempt. An empty parameter string is sent as `{}`.
    pub fn attempt(&self, image: &ImageHandle, parameters: &str) -> ExecutionAttempt {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("execution", attempt = %id, image = %image.tag);
        let _enter = span.enter();
        let started = Instant::now();

        let mut tracker = Tracker {
            trail: vec![ExecutionState::Idle],
        };
        tracker.advance(ExecutionState::ImageReady);

        let outcome = self.exchange(image, request_body(parameters), &mut tracker);
        tracker.advance(ExecutionState::for_outcome(&outcome));

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            ExecutionOutcome::PlatformFailure { kind, message } => {
                tracing::error!(%kind, %message, elapsed_ms, "execution failed on the platform side");
            }
            ExecutionOutcome::UserFailure { message } => {
                tracing::info!(%message, elapsed_ms, "lambda reported a failure");
            }
            ExecutionOutcome::Success(_) => tracing::info!(elapsed_ms, "execution succeeded"),
        }

        ExecutionAttempt {
            id,
            trail: tracker.trail,
            outcome,
        }
    }

    fn exchange(&self, image: &ImageHandle, request: Vec<u8>, tracker: &mut Tracker) -> ExecutionOutcome {
        let container = match self.engine.run(image) {
            Ok(container) => container,
            Err(e) => return ExecutionOutcome::platform(PlatformFailureKind::Io, e.to_string()),
        };
        let mut guard = ContainerGuard::new(container);
        tracker.advance(ExecutionState::ContainerRunning);

        let stdin = guard.container().take_stdin();
        let stdout = guard.container().take_stdout();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            return ExecutionOutcome::platform(
                PlatformFailureKind::Io,
                "container streams are not attached",
            );
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let max_response = self.max_response_bytes;
        let spawned = thread::Builder::new()
            .name("execution-io".to_string())
            .spawn(move || {
                let _ = tx.send(exchange_frames(stdin, stdout, &request, max_response));
            });
        if let Err(e) = spawned {
            return ExecutionOutcome::platform(PlatformFailureKind::Internal, format!("spawn io thread: {}", e));
        }

        let outcome = match rx.recv_timeout(self.timeout) {
            Ok(Ok(payload)) => decode_response(&payload),
            Ok(Err(ExchangeError::Write(e))) => {
                ExecutionOutcome::platform(PlatformFailureKind::Io, format!("write request: {}", e))
            }
            Ok(Err(ExchangeError::Read(e @ FrameError::TooLarge { .. }))) => {
                ExecutionOutcome::platform(PlatformFailureKind::MalformedResponse, e.to_string())
            }
            Ok(Err(ExchangeError::Read(e @ FrameError::Truncated { .. }))) => ExecutionOutcome::platform(
                PlatformFailureKind::Io,
                format!("container exited without a complete response: {}", e),
            ),
            Ok(Err(ExchangeError::Read(e))) => {
                ExecutionOutcome::platform(PlatformFailureKind::Io, format!("read response: {}", e))
            }
            Err(mpsc::RecvTimeoutError::Timeout) => ExecutionOutcome::platform(
                PlatformFailureKind::Timeout,
                format!("no response within {} ms", self.timeout.as_millis()),
            ),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                ExecutionOutcome::platform(PlatformFailureKind::Internal, "io thread exited without a result")
            }
        };
        drop(guard);
        outcome
    }
}

fn request_body(parameters: &str) -> Vec<u8> {
    let trimmed = parameters.trim();
    if trimmed.is_empty() {
        b"{}".to_vec()
    } else {
        trimmed.as_bytes().to_vec()
    }
}

fn exchange_frames(
    mut stdin: Box<dyn Write + Send>,
    mut stdout: Box<dyn Read + Send>,
    request: &[u8],
    max_response: u32,
) -> Result<Vec<u8>, ExchangeError> {
    frame::write_frame(&mut stdin, request).map_err(ExchangeError::Write)?;
    drop(stdin);
    frame::read_frame(&mut stdout, max_response).map_err(ExchangeError::Read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ImageBuilder, InMemoryEngine};
    use crate::execution::artifact::ArtifactBuilder;
    use crate::execution::handlers::HandlerRegistry;
    use crate::primitives::LambdaMetadata;
    use serde_json::json;

    fn engine() -> Arc<InMemoryEngine> {
        let mut registry = HandlerRegistry::new();
        registry.register("Math", "double", "Number", |n: i64| Ok::<_, String>(n * 2));
        registry.register("Math", "sleep", "Number", |ms: u64| {
            thread::sleep(Duration::from_millis(ms));
            Ok::<_, String>(ms)
        });
        registry.register("Math", "big", "Number", |n: usize| Ok::<_, String>("x".repeat(n)));
        registry.register("Math", "fail", "Number", |_: i64| Err::<i64, _>("boom"));
        Arc::new(InMemoryEngine::new(Arc::new(registry)))
    }

    fn image(engine: &Arc<InMemoryEngine>, method: &str) -> ImageHandle {
        let artifact = ArtifactBuilder::new(&LambdaMetadata {
            class: "Math".into(),
            method: method.into(),
            parameter_type: Some("Number".into()),
            has_parameter: true,
        })
        .unwrap()
        .finish()
        .unwrap();
        let mut builder = ImageBuilder::new(engine.clone(), None);
        builder
            .set_template("scratch")
            .set_command("lambda-entrypoint lambda.tar")
            .store_file(artifact, "lambda.tar", false)
            .unwrap();
        builder.build().unwrap()
    }

    fn bridge(engine: &Arc<InMemoryEngine>, timeout_ms: u64, max_response_bytes: u32) -> ExecutionBridge {
        ExecutionBridge::new(
            engine.clone(),
            &ExecutionConfig {
                timeout_ms,
                max_response_bytes,
            },
        )
    }

    #[test]
    fn success_walks_the_happy_path() {
        let engine = engine();
        let image = image(&engine, "double");
        let attempt = bridge(&engine, 5_000, 1 << 20).attempt(&image, "21");
        assert_eq!(attempt.outcome(), &ExecutionOutcome::Success(Some(json!(42))));
        assert_eq!(
            attempt.trail(),
            &[
                ExecutionState::Idle,
                ExecutionState::ImageReady,
                ExecutionState::ContainerRunning,
                ExecutionState::Succeeded
            ]
        );
        assert_eq!(engine.live_containers(), 0);
    }

    #[test]
    fn user_failure_is_data() {
        let engine = engine();
        let image = image(&engine, "fail");
        let attempt = bridge(&engine, 5_000, 1 << 20).attempt(&image, "1");
        assert_eq!(attempt.state(), ExecutionState::UserFailed);
        assert_eq!(attempt.into_outcome(), ExecutionOutcome::user("boom"));
    }

    #[test]
    fn slow_container_times_out_and_is_torn_down() {
        let engine = engine();
        let image = image(&engine, "sleep");
        let started = Instant::now();
        let outcome = bridge(&engine, 50, 1 << 20).execute(&image, "1000");
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(matches!(
            outcome,
            ExecutionOutcome::PlatformFailure { kind: PlatformFailureKind::Timeout, .. }
        ));
        assert_eq!(engine.live_containers(), 0);
    }

    #[test]
    fn unreachable_engine_is_an_io_failure_without_a_container() {
        let engine = engine();
        let image = image(&engine, "double");
        engine.refuse_runs(true);
        let attempt = bridge(&engine, 5_000, 1 << 20).attempt(&image, "1");
        assert!(matches!(
            attempt.outcome(),
            ExecutionOutcome::PlatformFailure { kind: PlatformFailureKind::Io, .. }
        ));
        assert!(!attempt.trail().contains(&ExecutionState::ContainerRunning));
        assert_eq!(engine.runs(), 0);
    }

    #[test]
    fn oversized_response_is_malformed() {
        let engine = engine();
        let image = image(&engine, "big");
        let outcome = bridge(&engine, 5_000, 64).execute(&image, "4096");
        assert!(matches!(
            outcome,
            ExecutionOutcome::PlatformFailure { kind: PlatformFailureKind::MalformedResponse, .. }
        ));
    }

    #[test]
    fn empty_parameters_are_sent_as_empty_object() {
        assert_eq!(request_body("  "), b"{}");
        assert_eq!(request_body(r#" {"x":1} "#), br#"{"x":1}"#);
    }
}
