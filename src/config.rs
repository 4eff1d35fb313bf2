//! Platform configuration.
//!
//! Loaded from JSON; every field has a default so an empty object is a valid
//! configuration.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlatformConfig {
    pub docker: DockerConfig,
    pub execution: ExecutionConfig,
    /// Parent directory for image build staging directories. Defaults to the OS temp dir.
    pub staging_dir: Option<PathBuf>,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub runtimes: Vec<RuntimeConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DockerConfig {
    pub binary: String,
    /// Engine endpoint passed as `-H`; the CLI default is used when absent.
    pub host: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub timeout_ms: u64,
    pub max_response_bytes: u32,
}

/// A runtime template lambdas can select by name.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub name: String,
    /// Base image the lambda image is built from.
    pub template: String,
    /// Launch command of the entrypoint process inside the container.
    pub command: String,
    /// File name the deployed artifact is stored under in the image.
    pub artifact_name: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            docker: DockerConfig::default(),
            execution: ExecutionConfig::default(),
            staging_dir: None,
            log_filter: "info".to_string(),
            runtimes: vec![RuntimeConfig::native()],
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            binary: "docker".to_string(),
            host: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            timeout_ms: 30_000,
            max_response_bytes: 16 * 1024 * 1024,
        }
    }
}

impl RuntimeConfig {
    /// The built-in runtime: the entrypoint binary runs the artifact's executables.
    pub fn native() -> Self {
        RuntimeConfig {
            name: "native".to_string(),
            template: "smartlambda/native-runtime:latest".to_string(),
            command: "lambda-entrypoint lambda.tar".to_string(),
            artifact_name: "lambda.tar".to_string(),
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl PlatformConfig {
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, ConfigError> {
        let mut buf = String::new();
        reader.read_to_string(&mut buf)?;
        Self::parse_str(&buf)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    /// Parses and validates a JSON document.
    pub fn parse_str(raw: &str) -> Result<Self, ConfigError> {
        let config: PlatformConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.docker.binary.trim().is_empty() {
            return Err(ConfigError::Invalid("docker.binary must not be empty".into()));
        }
        if self.execution.timeout_ms == 0 {
            return Err(ConfigError::Invalid("execution.timeout_ms must be positive".into()));
        }
        if self.execution.max_response_bytes == 0 {
            return Err(ConfigError::Invalid(
                "execution.max_response_bytes must be positive".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for runtime in &self.runtimes {
            if runtime.name.trim().is_empty() {
                return Err(ConfigError::Invalid("runtime name must not be empty".into()));
            }
            if !seen.insert(runtime.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "runtime {} is declared twice",
                    runtime.name
                )));
            }
            if runtime.template.trim().is_empty() || runtime.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "runtime {} needs a template and a command",
                    runtime.name
                )));
            }
            if runtime.artifact_name.is_empty()
                || runtime.artifact_name.contains('/')
                || runtime.artifact_name == "Dockerfile"
            {
                return Err(ConfigError::Invalid(format!(
                    "runtime {} has an invalid artifact_name",
                    runtime.name
                )));
            }
        }
        Ok(())
    }
}
