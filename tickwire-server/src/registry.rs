//! Callable host functions.
//!
//! The server never owns a global function table. It is handed something
//! implementing [`FunctionRegistry`] and asks it for callables by name. The
//! in-memory [`Registry`] covers embedders that build their table up front.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Failure reported by a host function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationError {
    message: String,
}

impl InvocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The caller passed arguments the function cannot use.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(format!("invalid arguments: {}", message.into()))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for InvocationError {}

impl From<serde_json::Error> for InvocationError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Deserializes the positional argument at `index`.
pub fn arg_as<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, InvocationError> {
    let value = args.get(index).ok_or_else(|| {
        InvocationError::invalid_args(format!(
            "expected at least {} argument(s), got {}",
            index + 1,
            args.len()
        ))
    })?;
    serde_json::from_value(value.clone())
        .map_err(|e| InvocationError::invalid_args(format!("argument {}: {}", index, e)))
}

/// A host function callable with positional JSON arguments.
pub trait Invocable {
    fn invoke(&mut self, args: &[Value]) -> Result<Value, InvocationError>;
}

impl<F> Invocable for F
where
    F: FnMut(&[Value]) -> Result<Value, InvocationError>,
{
    fn invoke(&mut self, args: &[Value]) -> Result<Value, InvocationError> {
        self(args)
    }
}

/// Name to callable lookup consumed by the request handler.
pub trait FunctionRegistry {
    /// Returns the callable registered under `name`, if it may be called.
    fn lookup(&mut self, name: &str) -> Option<&mut dyn Invocable>;
}

/// In-memory function table.
#[derive(Default)]
pub struct Registry {
    functions: HashMap<String, Box<dyn Invocable>>,
    prefix: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only names starting with `prefix` are callable over the wire.
    ///
    /// Functions outside the prefix can still be registered, they are just
    /// never returned from [`FunctionRegistry::lookup`].
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            functions: HashMap::new(),
            prefix: Some(prefix.into()),
        }
    }

    /// Registers a closure, returning the callable it replaced.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> Option<Box<dyn Invocable>>
    where
        F: FnMut(&[Value]) -> Result<Value, InvocationError> + 'static,
    {
        self.register_invocable(name, Box::new(function))
    }

    /// Registers any boxed [`Invocable`], returning the one it replaced.
    pub fn register_invocable(
        &mut self,
        name: impl Into<String>,
        function: Box<dyn Invocable>,
    ) -> Option<Box<dyn Invocable>> {
        let name = name.into();
        debug!(name = %name, "registering function");
        self.functions.insert(name, function)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Box<dyn Invocable>> {
        self.functions.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn is_allowed(&self, name: &str) -> bool {
        match &self.prefix {
            Some(prefix) => name.starts_with(prefix.as_str()),
            None => true,
        }
    }
}

impl FunctionRegistry for Registry {
    fn lookup(&mut self, name: &str) -> Option<&mut dyn Invocable> {
        if !self.is_allowed(name) {
            debug!(name, hit = "denied", "registry lookup");
            return None;
        }
        match self.functions.get_mut(name) {
            Some(function) => {
                debug!(name, hit = "found", "registry lookup");
                Some(function.as_mut())
            }
            None => {
                debug!(name, hit = "miss", "registry lookup");
                None
            }
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("functions", &self.names())
            .field("prefix", &self.prefix)
            .finish()
    }
}
