//! Name-to-handler lookup table.

use crate::error::FunctionError;
use crate::stores::{AppointmentStore, OrderStore};
use crate::{medical, pharmacy};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered function handler.
///
/// Handlers take the parsed argument object and return the result value
/// that is serialized into the response envelope's `content` field.
pub type Handler = Arc<dyn Fn(&Value) -> Result<Value, FunctionError> + Send + Sync>;

/// The function dispatch table: name → handler.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    handlers: HashMap<String, Handler>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in medical and pharmacy handler
    /// registered against the given stores.
    pub fn with_default_handlers(
        appointments: Arc<dyn AppointmentStore>,
        orders: Arc<dyn OrderStore>,
    ) -> Self {
        let mut registry = Self::new();
        medical::register(&mut registry, appointments);
        pharmacy::register(&mut registry, orders);
        registry
    }

    /// Registers a handler under a name, replacing any previous handler.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    /// Looks up a handler by name.
    pub fn lookup(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    /// Resolves and executes a function by name.
    ///
    /// Unknown names yield `FunctionError::NotFound`; argument and handler
    /// failures pass through as the handler's error. Never panics.
    pub fn dispatch(&self, name: &str, args: &Value) -> Result<Value, FunctionError> {
        let handler = self
            .lookup(name)
            .ok_or_else(|| FunctionError::NotFound(name.to_string()))?;
        handler(args)
    }

    /// Returns the registered function names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
