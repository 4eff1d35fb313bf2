use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::PlatformError;
use crate::execution::{ExecutionOutcome, PlatformFailureKind};

/// An execution running on the tokio blocking pool.
///
/// Dropping it does not cancel the execution: the container still runs to
/// completion (or timeout) and is torn down.
#[derive(Debug)]
pub struct PendingExecution {
    handle: JoinHandle<ExecutionOutcome>,
    runtime: Handle,
}

impl PendingExecution {
    /// Spawns `job` on the current tokio runtime.
    pub(crate) fn spawn<F>(job: F) -> Result<Self, PlatformError>
    where
        F: FnOnce() -> ExecutionOutcome + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| {
            PlatformError::Runtime(format!("asynchronous execution needs a tokio runtime: {}", e))
        })?;
        let handle = runtime.spawn_blocking(job);
        Ok(PendingExecution { handle, runtime })
    }

    /// Runs `f` on the outcome as soon as it is produced, whether or not
    /// anyone awaits the returned future.
    pub fn inspect<F>(self, f: F) -> Self
    where
        F: FnOnce(&ExecutionOutcome) + Send + 'static,
    {
        let runtime = self.runtime.clone();
        let handle = runtime.spawn(async move {
            let outcome = self.await;
            f(&outcome);
            outcome
        });
        PendingExecution { handle, runtime }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for PendingExecution {
    type Output = ExecutionOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| {
                tracing::error!(error = %e, "execution task did not complete");
                ExecutionOutcome::platform(
                    PlatformFailureKind::Internal,
                    format!("execution task failed: {}", e),
                )
            })
        })
    }
}
