//! Progress events emitted by a run.
//!
//! Events serialize as JSON objects tagged by `type` (`task_start`,
//! `step_complete`, ...) so a transport can forward them unchanged. Every run
//! ends with exactly one `task_complete`.

use serde::Serialize;
use serde_json::Value;
use strum::Display;

use super::gate::GateResponder;
use crate::types::StepKind;

/// Terminal outcome reported in `task_complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    /// A step or the pre hook failed
    Failed,
    /// A gate was denied or timed out, or the run was cancelled
    Aborted,
}

/// Status reported in `step_complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepCompletion {
    Completed,
    Denied,
    Timeout,
    Cancelled,
}

/// Which side of the step sequence a hook runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HookPhase {
    Pre,
    Post,
}

/// One progress notification
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskStart {
        task_id: String,
        task_name: String,
        total_steps: usize,
    },
    HookStart {
        hook: String,
        phase: HookPhase,
    },
    HookComplete {
        hook: String,
        phase: HookPhase,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StepStart {
        step: String,
        step_index: usize,
        step_type: StepKind,
    },
    StepSkipped {
        step: String,
        step_index: usize,
        reason: String,
    },
    FunctionResult {
        step: String,
        function: String,
        result: Value,
        success: bool,
    },
    Stream {
        step: String,
        chunk: String,
    },
    ConfirmationRequired {
        step: String,
        request_id: String,
        message: String,
        /// Answer the gate in-process; remote transports use the broker
        #[serde(skip)]
        responder: GateResponder,
    },
    StepComplete {
        step: String,
        status: StepCompletion,
    },
    StepError {
        step: String,
        error: String,
    },
    TaskComplete {
        task_id: String,
        task_name: String,
        status: TaskOutcome,
        summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        failed_step: Option<String>,
    },
}

impl ProgressEvent {
    /// The `type` tag of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskStart { .. } => "task_start",
            Self::HookStart { .. } => "hook_start",
            Self::HookComplete { .. } => "hook_complete",
            Self::StepStart { .. } => "step_start",
            Self::StepSkipped { .. } => "step_skipped",
            Self::FunctionResult { .. } => "function_result",
            Self::Stream { .. } => "stream",
            Self::ConfirmationRequired { .. } => "confirmation_required",
            Self::StepComplete { .. } => "step_complete",
            Self::StepError { .. } => "step_error",
            Self::TaskComplete { .. } => "task_complete",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TaskComplete { .. })
    }
}
