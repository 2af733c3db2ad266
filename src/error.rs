//! Error handling for the orchestration engine
//!
//! Each subsystem reports failures through its own `thiserror` enum
//! (`ParseError`, `RegistryError`, `StoreError`, ...). This module provides the
//! crate-wide `EngineError` those enums convert into, so callers that drive
//! several subsystems at once can use a single `Result` type.

use thiserror::Error;

use crate::classifier::ClassifierError;
use crate::engine::hooks::HookError;
use crate::narrative::NarrativeError;
use crate::plan::loader::ParseError;
use crate::registry::{OperationError, RegistryError};
use crate::safety::SafetyError;
use crate::state::RunTransitionError;
use crate::store::StoreError;

/// Main error type for the orchestration engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// IO errors (plan files, run-state files, backups)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plan definition could not be loaded
    #[error("Plan error: {0}")]
    Plan(#[from] ParseError),

    /// Capability registry lookups and registration
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// An operation handler reported failure
    #[error("Operation failed: {0}")]
    Operation(#[from] OperationError),

    /// Classifier profile configuration failure
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    /// Narrative collaborator failure
    #[error("Narrative error: {0}")]
    Narrative(#[from] NarrativeError),

    /// Safety collaborator failure (backup or undo)
    #[error("Safety error: {0}")]
    Safety(#[from] SafetyError),

    /// Lifecycle hook failure
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// Run-state persistence failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid run state transition
    #[error("Run transition error: {0}")]
    Transition(#[from] RunTransitionError),

    /// Gate confirmation could not be delivered
    #[error("Confirmation error: {0}")]
    Confirmation(String),

    /// The run task ended abnormally (panicked or was aborted)
    #[error("Run task error: {0}")]
    Join(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a confirmation error
    pub fn confirmation(msg: impl Into<String>) -> Self {
        Self::Confirmation(msg.into())
    }

    /// Create a general error
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }
}
