//! In-process entry resolution: handlers registered under (class, method).

use std::collections::HashMap;
use std::fmt::Display;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::execution::entrypoint::{EntryPoint, EntryResolver, InvocationError, ResolutionError};
use crate::primitives::LambdaMetadata;

type HandlerFn = dyn Fn(Option<&Value>) -> Result<Option<Value>, InvocationError> + Send + Sync;

struct Handler {
    /// Declared parameter type name, `None` for handlers without a parameter.
    parameter_type: Option<String>,
    call: Box<HandlerFn>,
}

/// Typed handlers keyed by entry class and method name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HashMap<String, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    /// Registers a handler taking one parameter deserialised from the request.
    /// `parameter_type` must match the artifact's declared parameter type.
    pub fn register<P, T, E, F>(&mut self, class: &str, method: &str, parameter_type: &str, handler: F)
    where
        P: DeserializeOwned,
        T: Serialize,
        E: Display,
        F: Fn(P) -> Result<T, E> + Send + Sync + 'static,
    {
        let call = move |parameter: Option<&Value>| -> Result<Option<Value>, InvocationError> {
            let raw = parameter.cloned().unwrap_or(Value::Null);
            let typed: P = serde_json::from_value(raw)
                .map_err(|e| InvocationError::InvalidParameter(e.to_string()))?;
            let returned = handler(typed).map_err(|e| InvocationError::User(e.to_string()))?;
            to_return_value(&returned)
        };
        self.insert(class, method, Some(parameter_type.to_string()), Box::new(call));
    }

    pub fn register_without_parameter<T, E, F>(&mut self, class: &str, method: &str, handler: F)
    where
        T: Serialize,
        E: Display,
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        let call = move |_: Option<&Value>| -> Result<Option<Value>, InvocationError> {
            let returned = handler().map_err(|e| InvocationError::User(e.to_string()))?;
            to_return_value(&returned)
        };
        self.insert(class, method, None, Box::new(call));
    }

    fn insert(&mut self, class: &str, method: &str, parameter_type: Option<String>, call: Box<HandlerFn>) {
        self.handlers
            .entry(class.to_string())
            .or_default()
            .insert(method.to_string(), Handler { parameter_type, call });
    }
}

fn to_return_value<T: Serialize>(returned: &T) -> Result<Option<Value>, InvocationError> {
    match serde_json::to_value(returned) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(e) => Err(InvocationError::Internal(format!("return value is not serialisable: {}", e))),
    }
}

impl EntryResolver for HandlerRegistry {
    fn resolve<'a>(
        &'a self,
        _artifact: &[u8],
        metadata: &LambdaMetadata,
    ) -> Result<Box<dyn EntryPoint + 'a>, ResolutionError> {
        let methods = self
            .handlers
            .get(&metadata.class)
            .ok_or_else(|| ResolutionError::UnknownClass(metadata.class.clone()))?;
        let handler = methods
            .get(&metadata.method)
            .ok_or_else(|| ResolutionError::UnknownMethod {
                class: metadata.class.clone(),
                method: metadata.method.clone(),
            })?;
        let declared = if metadata.has_parameter {
            metadata.parameter_type.as_deref()
        } else {
            None
        };
        if declared != handler.parameter_type.as_deref() {
            return Err(ResolutionError::ParameterMismatch {
                class: metadata.class.clone(),
                method: metadata.method.clone(),
                declared: declared.unwrap_or("no parameter").to_string(),
                actual: handler.parameter_type.as_deref().unwrap_or("no parameter").to_string(),
            });
        }
        Ok(Box::new(RegisteredEntry { handler }))
    }
}

struct RegisteredEntry<'a> {
    handler: &'a Handler,
}

impl EntryPoint for RegisteredEntry<'_> {
    fn invoke(&self, parameter: Option<&Value>) -> Result<Option<Value>, InvocationError> {
        (self.handler.call)(parameter)
    }
}
