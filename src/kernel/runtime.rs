//! Lambda runtimes.
//!
//! A `Runtime` is a base image template plus the command that starts the
//! entrypoint inside it. The registry is built once at startup from
//! configuration and is read-only afterwards; components hold it by `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{ConfigError, RuntimeConfig};
use crate::container::ImageBuilder;
use crate::error::PlatformError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runtime {
    name: String,
    template: String,
    command: String,
    artifact_name: String,
}

impl Runtime {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Runtime {
            name: config.name.clone(),
            template: config.template.clone(),
            command: config.command.clone(),
            artifact_name: config.artifact_name.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    /// Prepares `builder` to build an image running `artifact` on this runtime.
    pub fn setup(&self, builder: &mut ImageBuilder, artifact: Vec<u8>) -> Result<(), PlatformError> {
        builder
            .set_template(&self.template)
            .set_command(&self.command)
            .store_file(artifact, &self.artifact_name, false)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RuntimeRegistry {
    runtimes: BTreeMap<String, Arc<Runtime>>,
}

impl RuntimeRegistry {
    pub fn from_config(runtimes: &[RuntimeConfig]) -> Result<Self, ConfigError> {
        let mut registry = RuntimeRegistry::default();
        for config in runtimes {
            let runtime = Arc::new(Runtime::from_config(config));
            if registry.runtimes.insert(config.name.clone(), runtime).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "runtime {} is declared twice",
                    config.name
                )));
            }
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Runtime>> {
        self.runtimes.get(name).cloned()
    }

    /// Like `get`, failing with `InvalidLambdaDefinition` for unknown names.
    pub fn require(&self, name: &str) -> Result<Arc<Runtime>, PlatformError> {
        self.get(name).ok_or_else(|| {
            PlatformError::InvalidLambdaDefinition(format!("unknown runtime: {}", name))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.runtimes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jre8() -> RuntimeConfig {
        RuntimeConfig {
            name: "jre8".into(),
            template: "openjdk:8".into(),
            command: "java -jar executor.jar".into(),
            artifact_name: "lambda.jar".into(),
        }
    }

    #[test]
    fn lookup_by_name() {
        let registry = RuntimeRegistry::from_config(&[RuntimeConfig::native(), jre8()]).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), ["jre8", "native"]);
        assert_eq!(registry.require("jre8").unwrap().template(), "openjdk:8");
        assert!(matches!(
            registry.require("python"),
            Err(PlatformError::InvalidLambdaDefinition(_))
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        assert!(RuntimeRegistry::from_config(&[jre8(), jre8()]).is_err());
    }
}
