//! Capability Registry
//!
//! Maps operation names to the handlers that perform them, grouped under the
//! capability that owns them. The registry is assembled once with
//! `RegistryBuilder` and then shared read-only, so lookups during a run
//! never contend with registration.
//!
//! # Design Principles
//!
//! - **No silent overwrite**: `register` refuses a name that is already taken;
//!   replacing a handler is an explicit `replace` call
//! - **Declared parameters**: a handler lists the conventional arguments it
//!   accepts (`profile`, `session_id`, ...) so the engine can supply them
//! - **Async by default**: handlers are `async` so network I/O never blocks
//!   the run loop

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::plan::Args;

/// Errors raised by operation handlers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The handler rejected its arguments
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The remote API or device reported a failure
    #[error("{0}")]
    Failed(String),
}

impl OperationError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }
}

/// Errors that can occur while registering or resolving operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Operation '{operation}' is not registered")]
    NotFound { operation: String },

    #[error("Operation '{operation}' is already registered by capability '{capability}'")]
    Duplicate {
        operation: String,
        capability: String,
    },

    #[error("Capability '{capability}' is not declared")]
    UnknownCapability { capability: String },
}

/// A callable operation
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Conventional parameter names this handler accepts (e.g. `profile`)
    fn declared_params(&self) -> &[String] {
        &[]
    }

    /// Perform the operation
    async fn call(&self, args: Args) -> Result<Value, OperationError>;
}

/// Handler backed by a synchronous closure
pub struct FnHandler<F> {
    params: Vec<String>,
    func: F,
}

#[async_trait]
impl<F> OperationHandler for FnHandler<F>
where
    F: Fn(Args) -> Result<Value, OperationError> + Send + Sync,
{
    fn declared_params(&self) -> &[String] {
        &self.params
    }

    async fn call(&self, args: Args) -> Result<Value, OperationError> {
        (self.func)(args)
    }
}

/// Handler backed by a closure returning a future
pub struct AsyncFnHandler<F> {
    params: Vec<String>,
    func: F,
}

#[async_trait]
impl<F, Fut> OperationHandler for AsyncFnHandler<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    fn declared_params(&self) -> &[String] {
        &self.params
    }

    async fn call(&self, args: Args) -> Result<Value, OperationError> {
        (self.func)(args).await
    }
}

/// Wrap a fast, non-blocking closure as a handler
pub fn handler_fn<F>(params: &[&str], func: F) -> Arc<dyn OperationHandler>
where
    F: Fn(Args) -> Result<Value, OperationError> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        params: params.iter().map(|p| p.to_string()).collect(),
        func,
    })
}

/// Wrap an async closure as a handler
pub fn async_handler_fn<F, Fut>(params: &[&str], func: F) -> Arc<dyn OperationHandler>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    Arc::new(AsyncFnHandler {
        params: params.iter().map(|p| p.to_string()).collect(),
        func,
    })
}

/// Descriptive metadata for a capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
}

impl CapabilityInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// An operation entry in the registry
#[derive(Clone)]
pub struct RegisteredOperation {
    pub name: String,
    pub capability: String,
    pub handler: Arc<dyn OperationHandler>,
}

impl fmt::Debug for RegisteredOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredOperation")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .field("params", &self.handler.declared_params())
            .finish()
    }
}

/// Immutable operation lookup table
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, CapabilityInfo>,
    operations: HashMap<String, RegisteredOperation>,
}

impl CapabilityRegistry {
    /// Start assembling a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up the handler for an operation
    pub fn resolve(&self, operation: &str) -> Result<&RegisteredOperation, RegistryError> {
        self.operations
            .get(operation)
            .ok_or_else(|| RegistryError::NotFound {
                operation: operation.to_string(),
            })
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    /// Declared capabilities in name order
    pub fn capabilities(&self) -> impl Iterator<Item = &CapabilityInfo> {
        self.capabilities.values()
    }

    /// Operation names owned by a capability, sorted
    pub fn operations_of(&self, capability: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .operations
            .values()
            .filter(|op| op.capability == capability)
            .map(|op| op.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Mutable builder for `CapabilityRegistry`
#[derive(Default)]
pub struct RegistryBuilder {
    registry: CapabilityRegistry,
}

impl RegistryBuilder {
    /// Declare a capability so operations can be registered under it
    pub fn capability(mut self, info: CapabilityInfo) -> Self {
        self.registry.capabilities.insert(info.name.clone(), info);
        self
    }

    /// Register an operation. Fails if the name is already taken.
    pub fn register(
        mut self,
        capability: &str,
        operation: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) -> Result<Self, RegistryError> {
        let operation = operation.into();
        if let Some(existing) = self.registry.operations.get(&operation) {
            return Err(RegistryError::Duplicate {
                operation,
                capability: existing.capability.clone(),
            });
        }
        self.insert(capability, operation, handler)?;
        Ok(self)
    }

    /// Register an operation, replacing any existing handler of that name
    pub fn replace(
        mut self,
        capability: &str,
        operation: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) -> Result<Self, RegistryError> {
        self.insert(capability, operation.into(), handler)?;
        Ok(self)
    }

    fn insert(
        &mut self,
        capability: &str,
        operation: String,
        handler: Arc<dyn OperationHandler>,
    ) -> Result<(), RegistryError> {
        if !self.registry.capabilities.contains_key(capability) {
            return Err(RegistryError::UnknownCapability {
                capability: capability.to_string(),
            });
        }
        debug!("Registered operation '{}' under '{}'", operation, capability);
        self.registry.operations.insert(
            operation.clone(),
            RegisteredOperation {
                name: operation,
                capability: capability.to_string(),
                handler,
            },
        );
        Ok(())
    }

    pub fn build(self) -> CapabilityRegistry {
        self.registry
    }
}
