//! Run State Machine
//!
//! `RunState` is the durable record of one execution of a plan: what ran,
//! what it produced, and every backup taken before a mutating call. The
//! engine owns the record for the lifetime of a run and persists it after
//! every step; rollback reads it back later.
//!
//! # Design Principles
//!
//! - **Validated Transitions**: status changes go through methods that refuse
//!   illegal moves (e.g. Completed → Running)
//! - **Monotonic Progress**: `current_step` never decreases
//! - **Append-only History**: step results and change records are only ever
//!   appended, never edited or removed
//!
//! # Status Flow
//!
//! ```text
//! Pending
//!     ↓
//! Running ──→ Failed
//!     ↓          ↓
//! Completed      ↓
//!     ↓          ↓
//!     └──→ RolledBack ←──┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{RunStatus, StepKind, StepStatus};

/// Errors that can occur during run state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunTransitionError {
    /// The requested move is not part of the status flow
    #[error("Cannot move run from {from} to {to}")]
    Illegal { from: RunStatus, to: RunStatus },

    /// Attempted to move the step cursor backwards
    #[error("Step cursor cannot move backwards from {current} to {requested}")]
    BackwardStep { current: usize, requested: usize },

    /// Step bookkeeping requires a running run
    #[error("Run is {status}, steps can only be recorded while running")]
    NotRunning { status: RunStatus },

    /// A run can only be rolled back once
    #[error("Run {run_id} has already been rolled back")]
    AlreadyRolledBack { run_id: String },
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub status: StepStatus,
    /// Structured output (operation result, narrative text, gate decision)
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    /// A step that has just started
    pub fn started(step_name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            step_name: step_name.into(),
            kind,
            status: StepStatus::Running,
            result: None,
            error: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    /// A step whose condition did not hold
    pub fn skipped(step_name: impl Into<String>, kind: StepKind) -> Self {
        let now = Utc::now();
        Self {
            step_name: step_name.into(),
            kind,
            status: StepStatus::Skipped,
            result: None,
            error: None,
            started_at: Some(now),
            completed_at: Some(now),
        }
    }

    pub fn complete(mut self, output: Value) -> Self {
        self.status = StepStatus::Completed;
        self.result = Some(output);
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self
    }
}

/// Record of a backup taken before a mutating operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Operation that was about to run
    #[serde(rename = "action")]
    pub operation: String,
    pub resource_type: String,
    pub resource_id: String,
    /// Where the safety collaborator stored the pre-change snapshot
    pub backup_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Durable record of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub task_id: String,
    pub task_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub steps_completed: Vec<StepResult>,
    /// Index of the step most recently entered
    pub current_step: usize,
    pub change_log: Vec<ChangeRecord>,
}

impl RunState {
    /// New pending run with a fresh id
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_name: task_name.into(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            steps_completed: Vec::new(),
            current_step: 0,
            change_log: Vec::new(),
        }
    }

    /// Pending → Running
    pub fn start(&mut self) -> Result<(), RunTransitionError> {
        self.transition(RunStatus::Pending, RunStatus::Running)
    }

    /// Running → Completed
    pub fn complete(&mut self) -> Result<(), RunTransitionError> {
        self.transition(RunStatus::Running, RunStatus::Completed)
    }

    /// Pending/Running → Failed
    pub fn fail(&mut self) -> Result<(), RunTransitionError> {
        match self.status {
            RunStatus::Pending | RunStatus::Running => {
                self.status = RunStatus::Failed;
                Ok(())
            }
            from => Err(RunTransitionError::Illegal {
                from,
                to: RunStatus::Failed,
            }),
        }
    }

    /// Any status except RolledBack → RolledBack.
    ///
    /// Running is accepted so a run interrupted by a crash can still be
    /// undone from its persisted record.
    pub fn mark_rolled_back(&mut self) -> Result<(), RunTransitionError> {
        if self.status == RunStatus::RolledBack {
            return Err(RunTransitionError::AlreadyRolledBack {
                run_id: self.task_id.clone(),
            });
        }
        self.status = RunStatus::RolledBack;
        Ok(())
    }

    /// Move the step cursor. It can stay put or advance, never go back.
    pub fn enter_step(&mut self, index: usize) -> Result<(), RunTransitionError> {
        self.ensure_running()?;
        if index < self.current_step {
            return Err(RunTransitionError::BackwardStep {
                current: self.current_step,
                requested: index,
            });
        }
        self.current_step = index;
        Ok(())
    }

    /// Append the outcome of a step
    pub fn record_step(&mut self, result: StepResult) -> Result<(), RunTransitionError> {
        self.ensure_running()?;
        self.steps_completed.push(result);
        Ok(())
    }

    /// Append a change record (before the mutating call it describes)
    pub fn record_change(&mut self, record: ChangeRecord) -> Result<(), RunTransitionError> {
        self.ensure_running()?;
        self.change_log.push(record);
        Ok(())
    }

    /// Result of the named step, if it has been recorded
    pub fn step_result(&self, name: &str) -> Option<&StepResult> {
        self.steps_completed.iter().find(|r| r.step_name == name)
    }

    fn ensure_running(&self) -> Result<(), RunTransitionError> {
        if self.status == RunStatus::Running {
            Ok(())
        } else {
            Err(RunTransitionError::NotRunning {
                status: self.status,
            })
        }
    }

    fn transition(&mut self, from: RunStatus, to: RunStatus) -> Result<(), RunTransitionError> {
        if self.status != from {
            return Err(RunTransitionError::Illegal {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
