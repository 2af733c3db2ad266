//! Task Execution Engine
//!
//! Runs a validated plan step by step against the capability registry. Each
//! run is its own tokio task that owns its `RunState`; the caller gets a
//! `RunHandle` with the progress event stream, a cancellation token and the
//! join handle that yields the final state.
//!
//! # Design Principles
//!
//! - **Shared read-only inputs**: the registry, plans and collaborators are
//!   behind `Arc` and never mutated during a run, so runs need no global lock
//! - **Sequential steps**: step N+1 is dispatched only after step N reached a
//!   terminal status and the run state was persisted
//! - **Backup before mutation**: a change record is written and persisted
//!   before any operation the safety collaborator marks as mutating
//! - **Explain every stop**: each run ends with exactly one `task_complete`
//!   event naming the outcome and, on failure, the step and reason

pub mod events;
pub mod gate;
pub mod hooks;
pub mod paths;
pub mod rollback;

mod executor;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::narrative::{NarrativeGenerator, NoNarrative};
use crate::plan::{Args, PlanDefinition};
use crate::registry::CapabilityRegistry;
use crate::safety::SafetyGuard;
use crate::state::RunState;
use crate::store::{self, MemoryRunStore, RunStateStore};

pub use events::{HookPhase, ProgressEvent, StepCompletion, TaskOutcome};
pub use gate::{ConfirmationBroker, GateDecision, GateResponder, PendingConfirmation};
pub use hooks::{hook_fn, Hook, HookContext, HookError, HookRegistry};
pub use rollback::{RollbackReport, UndoOutcome};

use executor::RunExecutor;

/// Default gate timeout
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-caller context handed to collaborators and used for conventional
/// argument injection
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub session_id: String,
    /// Active device profile; scopes backups and run files
    pub profile: Option<String>,
    /// Extra conventional arguments (e.g. a client handle id) offered to
    /// handlers that declare them
    pub conventional: Args,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            session_id: "default".to_string(),
            profile: None,
            conventional: Args::new(),
        }
    }
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.conventional.insert(name.into(), value);
        self
    }

    /// Value offered for a conventional parameter name, if any
    pub fn conventional_value(&self, name: &str) -> Option<Value> {
        match name {
            "profile" => self.profile.clone().map(Value::String),
            "session_id" => Some(Value::String(self.session_id.clone())),
            other => self.conventional.get(other).cloned(),
        }
    }
}

/// Tunables of a `TaskEngine`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub gate_timeout: Duration,
    /// Capacity of each run's progress channel
    pub event_buffer: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            gate_timeout: DEFAULT_GATE_TIMEOUT,
            event_buffer: 64,
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            gate_timeout: Duration::from_secs(config.gate_timeout_secs),
            event_buffer: config.event_buffer,
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) registry: Arc<CapabilityRegistry>,
    pub(crate) safety: Arc<dyn SafetyGuard>,
    pub(crate) store: Arc<dyn RunStateStore>,
    pub(crate) narrator: Arc<dyn NarrativeGenerator>,
    pub(crate) hooks: HookRegistry,
    pub(crate) broker: ConfirmationBroker,
    pub(crate) settings: EngineSettings,
}

/// Executes plans. Cheap to clone; clones share collaborators and the
/// confirmation broker.
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
}

impl TaskEngine {
    pub fn builder(
        registry: Arc<CapabilityRegistry>,
        safety: Arc<dyn SafetyGuard>,
    ) -> TaskEngineBuilder {
        TaskEngineBuilder {
            registry,
            safety,
            store: None,
            narrator: None,
            hooks: HookRegistry::default(),
            settings: EngineSettings::default(),
        }
    }

    /// Start a run of `plan` on its own task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute(
        &self,
        plan: Arc<PlanDefinition>,
        utterance: impl Into<String>,
        session: SessionContext,
    ) -> RunHandle {
        let (tx, rx) = mpsc::channel(self.inner.settings.event_buffer.max(1));
        let cancel = CancellationToken::new();
        let executor = RunExecutor::new(
            Arc::clone(&self.inner),
            plan,
            utterance.into(),
            session,
            tx,
            cancel.clone(),
        );
        let run_id = executor.run_id().to_string();
        info!("Starting run {} of plan '{}'", run_id, executor.plan_name());

        let task = tokio::spawn(executor.run());
        RunHandle {
            run_id,
            events: rx,
            cancel,
            task,
        }
    }

    /// Broker for answering gates by request id
    pub fn confirmations(&self) -> &ConfirmationBroker {
        &self.inner.broker
    }

    pub fn store(&self) -> &Arc<dyn RunStateStore> {
        &self.inner.store
    }

    pub fn settings(&self) -> EngineSettings {
        self.inner.settings
    }

    /// Load a persisted run, undo its changes and persist the RolledBack state
    pub async fn rollback(&self, run_id: &str, session: &SessionContext) -> Result<RollbackReport> {
        let mut state = store::load_blocking(Arc::clone(&self.inner.store), run_id.to_string()).await?;
        let report = rollback::rollback(&mut state, self.inner.safety.as_ref(), session).await?;
        store::save_blocking(Arc::clone(&self.inner.store), state).await?;
        Ok(report)
    }
}

/// Builder for `TaskEngine`
pub struct TaskEngineBuilder {
    registry: Arc<CapabilityRegistry>,
    safety: Arc<dyn SafetyGuard>,
    store: Option<Arc<dyn RunStateStore>>,
    narrator: Option<Arc<dyn NarrativeGenerator>>,
    hooks: HookRegistry,
    settings: EngineSettings,
}

impl TaskEngineBuilder {
    /// Run-state store (defaults to an in-memory store)
    pub fn store(mut self, store: Arc<dyn RunStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Narrative collaborator (defaults to one that is always unavailable)
    pub fn narrator(mut self, narrator: Arc<dyn NarrativeGenerator>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn gate_timeout(mut self, timeout: Duration) -> Self {
        self.settings.gate_timeout = timeout;
        self
    }

    pub fn build(self) -> TaskEngine {
        TaskEngine {
            inner: Arc::new(EngineInner {
                registry: self.registry,
                safety: self.safety,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(MemoryRunStore::new())),
                narrator: self.narrator.unwrap_or_else(|| Arc::new(NoNarrative)),
                hooks: self.hooks,
                broker: ConfirmationBroker::new(),
                settings: self.settings,
            }),
        }
    }
}

/// Caller's side of a running plan
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    events: mpsc::Receiver<ProgressEvent>,
    cancel: CancellationToken,
    task: JoinHandle<RunState>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Next progress event; `None` once the run has finished and the stream
    /// is drained
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Request cancellation. Observed at the next step boundary or gate wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish and return its final state.
    ///
    /// Undelivered events are discarded.
    pub async fn join(self) -> Result<RunState> {
        let RunHandle { events, task, .. } = self;
        drop(events);
        task.await.map_err(|e| EngineError::Join(e.to_string()))
    }

    /// Drain every event until the run ends, then return them with the
    /// final state
    pub async fn collect(mut self) -> Result<(Vec<ProgressEvent>, RunState)> {
        let mut collected = Vec::new();
        while let Some(event) = self.events.recv().await {
            collected.push(event);
        }
        let state = self.join().await?;
        Ok((collected, state))
    }
}
