//! Tracing subscriber setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::PlatformError;

/// Installs a global `fmt` subscriber writing to stderr.
///
/// `RUST_LOG` wins over `default_filter`. Stdout is never used: inside a
/// container it carries the execution protocol.
pub fn init_tracing(default_filter: &str) -> Result<(), PlatformError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| PlatformError::Runtime(format!("invalid log filter: {}", e)))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| PlatformError::Runtime(format!("tracing already initialised: {}", e)))
}
