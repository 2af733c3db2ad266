//! netops Library
//!
//! Deterministic orchestration of multi-step network automation plans:
//! plan loading, intent classification, safe step execution with backups and
//! human confirmation gates, persisted run state and rollback.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod narrative;
pub mod plan;
pub mod registry;
pub mod safety;
pub mod state;
pub mod store;
pub mod types;
pub mod verbs;

// Re-export main types for convenience
pub use classifier::{
    CapabilityProfile, ClassificationResult, ClassifierError, IntentClassifier, ModelClassifier,
    ModelVerdict, VerbAffinity,
};
pub use config::EngineConfig;
pub use engine::{
    ConfirmationBroker, EngineSettings, GateDecision, GateResponder, HookRegistry, ProgressEvent,
    RollbackReport, RunHandle, SessionContext, StepCompletion, TaskEngine, TaskOutcome,
};
pub use error::{EngineError, Result};
pub use narrative::{NarrativeError, NarrativeGenerator, NarrativePrompt, NarrativeStream};
pub use plan::{Args, Condition, ParseError, PlanCatalog, PlanDefinition, PlanStep, StepAction};
pub use registry::{
    async_handler_fn, handler_fn, CapabilityInfo, CapabilityRegistry, OperationError,
    OperationHandler, RegistryError,
};
pub use safety::{BackupSafetyGuard, SafetyCheck, SafetyError, SafetyGuard, SafetyLevel, SafetyPolicy};
pub use state::{ChangeRecord, RunState, RunTransitionError, StepResult};
pub use store::{FileRunStore, MemoryRunStore, RunStateStore, RunSummary, StoreError};
pub use types::{RiskLevel, RunStatus, StepKind, StepStatus};
