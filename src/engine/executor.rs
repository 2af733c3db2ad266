//! Per-run step loop.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{HookPhase, ProgressEvent, StepCompletion, TaskOutcome};
use super::gate::{self, GateOutcome};
use super::hooks::{HookContext, HookError};
use super::paths::{self, StepOutputs};
use super::{EngineInner, SessionContext};
use crate::narrative::{NarrativeError, NarrativePrompt};
use crate::plan::{Args, PlanDefinition, PlanStep, StepAction};
use crate::safety::SafetyError;
use crate::state::{ChangeRecord, RunState, StepResult};
use crate::store;
use crate::types::StepStatus;

const DEFAULT_GATE_MESSAGE: &str = "Confirm to proceed?";
const SIMPLIFIED_SYSTEM_PROMPT: &str = "Analyze the data.";

/// Why a step stopped the run
#[derive(Debug)]
enum StepFailure {
    /// The step itself failed; the run ends Failed
    Error(String),
    /// A gate was not approved; the run ends Aborted
    Halt {
        completion: StepCompletion,
        summary: String,
    },
}

impl StepFailure {
    fn message(&self) -> &str {
        match self {
            Self::Error(msg) => msg,
            Self::Halt { summary, .. } => summary,
        }
    }
}

pub(crate) struct RunExecutor {
    inner: Arc<EngineInner>,
    plan: Arc<PlanDefinition>,
    utterance: String,
    session: SessionContext,
    state: RunState,
    outputs: StepOutputs,
    events: mpsc::Sender<ProgressEvent>,
    cancel: CancellationToken,
}

impl RunExecutor {
    pub(crate) fn new(
        inner: Arc<EngineInner>,
        plan: Arc<PlanDefinition>,
        utterance: String,
        session: SessionContext,
        events: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let state = RunState::new(plan.name.clone());
        Self {
            inner,
            plan,
            utterance,
            session,
            state,
            outputs: StepOutputs::new(),
            events,
            cancel,
        }
    }

    pub(crate) fn run_id(&self) -> &str {
        &self.state.task_id
    }

    pub(crate) fn plan_name(&self) -> &str {
        &self.plan.name
    }

    /// Drive the run to a terminal status and return the final state
    pub(crate) async fn run(mut self) -> RunState {
        let plan = Arc::clone(&self.plan);

        self.emit(ProgressEvent::TaskStart {
            task_id: self.state.task_id.clone(),
            task_name: plan.name.clone(),
            total_steps: plan.steps.len(),
        })
        .await;

        if let Err(e) = self.state.start() {
            error!("Run {} could not start: {}", self.state.task_id, e);
        }
        self.persist().await;

        if let Some(hook) = &plan.hooks.pre {
            if let Err(e) = self.run_hook(hook, HookPhase::Pre).await {
                let summary = format!("Pre hook '{}' failed: {}", hook, e);
                return self.finish(TaskOutcome::Failed, summary, None).await;
            }
        }

        for (index, step) in plan.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let summary = format!("Run cancelled before step '{}'", step.name);
                return self
                    .finish(TaskOutcome::Aborted, summary, Some(step.name.clone()))
                    .await;
            }

            match self.run_step(index, step).await {
                Ok(()) => {}
                Err(StepFailure::Error(msg)) => {
                    self.emit(ProgressEvent::StepError {
                        step: step.name.clone(),
                        error: msg.clone(),
                    })
                    .await;
                    let summary = format!("Step '{}' failed: {}", step.name, msg);
                    return self
                        .finish(TaskOutcome::Failed, summary, Some(step.name.clone()))
                        .await;
                }
                Err(StepFailure::Halt {
                    completion,
                    summary,
                }) => {
                    self.emit(ProgressEvent::StepComplete {
                        step: step.name.clone(),
                        status: completion,
                    })
                    .await;
                    return self
                        .finish(TaskOutcome::Aborted, summary, Some(step.name.clone()))
                        .await;
                }
            }
        }

        if let Some(hook) = &plan.hooks.post {
            if let Err(e) = self.run_hook(hook, HookPhase::Post).await {
                warn!("Post hook '{}' of plan '{}' failed: {}", hook, plan.name, e);
            }
        }

        let completed = self.count_steps(StepStatus::Completed);
        let skipped = self.count_steps(StepStatus::Skipped);
        let summary = format!("{} step(s) completed, {} skipped", completed, skipped);
        self.finish(TaskOutcome::Completed, summary, None).await
    }

    async fn run_step(&mut self, index: usize, step: &PlanStep) -> Result<(), StepFailure> {
        self.state
            .enter_step(index)
            .map_err(|e| StepFailure::Error(e.to_string()))?;

        if let Some(condition) = &step.condition {
            if !condition.evaluate(&self.outputs) {
                info!("Skipping step '{}': {} is false", step.name, condition);
                self.record(StepResult::skipped(&step.name, step.kind()));
                self.persist().await;
                self.emit(ProgressEvent::StepSkipped {
                    step: step.name.clone(),
                    step_index: index,
                    reason: format!("Condition not met: {}", condition),
                })
                .await;
                return Ok(());
            }
        }

        debug!("Step {} '{}' ({})", index, step.name, step.kind());
        self.emit(ProgressEvent::StepStart {
            step: step.name.clone(),
            step_index: index,
            step_type: step.kind(),
        })
        .await;

        let started = StepResult::started(&step.name, step.kind());
        let outcome = match &step.action {
            StepAction::Operation {
                operation,
                args,
                args_from,
            } => {
                self.run_operation(step, operation, args, args_from.as_deref())
                    .await
            }
            StepAction::Narrative => self.run_narrative(step).await,
            StepAction::Gate { message_template } => {
                self.run_gate(step, message_template.as_deref()).await
            }
        };

        match outcome {
            Ok(output) => {
                self.outputs.insert(step.name.clone(), output.clone());
                self.record(started.complete(output));
                self.persist().await;
                self.emit(ProgressEvent::StepComplete {
                    step: step.name.clone(),
                    status: StepCompletion::Completed,
                })
                .await;
                Ok(())
            }
            Err(failure) => {
                warn!("Step '{}' stopped the run: {}", step.name, failure.message());
                self.record(started.fail(failure.message()));
                self.persist().await;
                Err(failure)
            }
        }
    }

    // =========================================================================
    // Operation steps
    // =========================================================================

    async fn run_operation(
        &mut self,
        step: &PlanStep,
        operation: &str,
        static_args: &Args,
        args_from: Option<&str>,
    ) -> Result<Value, StepFailure> {
        let registered = self
            .inner
            .registry
            .resolve(operation)
            .map_err(|e| StepFailure::Error(e.to_string()))?
            .clone();

        let mut args = static_args.clone();
        if let Some(path) = args_from {
            merge_resolved(&mut args, &self.outputs, path);
        }

        let check = self.inner.safety.classify(operation, &args);
        if check.backup_required {
            let backup = self
                .inner
                .safety
                .before_operation(operation, &args, &self.session)
                .await
                .map_err(|e| StepFailure::Error(e.to_string()))?;
            if !backup.backup_created {
                return Err(StepFailure::Error(
                    SafetyError::MissingBackup {
                        operation: operation.to_string(),
                    }
                    .to_string(),
                ));
            }

            let record = ChangeRecord {
                operation: operation.to_string(),
                resource_type: infer_resource_type(operation).to_string(),
                resource_id: infer_resource_id(&args),
                backup_path: backup.backup_path,
                timestamp: Utc::now(),
            };
            info!(
                "Recording change for '{}' ({} {}) before execution",
                operation, record.resource_type, record.resource_id
            );
            self.state
                .record_change(record)
                .map_err(|e| StepFailure::Error(e.to_string()))?;
            self.persist().await;
        }

        inject_conventional(&mut args, registered.handler.declared_params(), &self.session);

        debug!("Calling '{}' for step '{}'", operation, step.name);
        let result = registered
            .handler
            .call(args)
            .await
            .map_err(|e| StepFailure::Error(format!("Operation '{}' failed: {}", operation, e)))?;

        self.emit(ProgressEvent::FunctionResult {
            step: step.name.clone(),
            function: operation.to_string(),
            result: result.clone(),
            success: true,
        })
        .await;

        Ok(json!({ "result": result, "success": true }))
    }

    // =========================================================================
    // Narrative steps
    // =========================================================================

    async fn run_narrative(&mut self, step: &PlanStep) -> Result<Value, StepFailure> {
        let prompt = self.narrative_prompt(step);
        match self.stream_narrative(step, prompt).await {
            Ok(text) => Ok(json!({ "text": text })),
            Err(first) => {
                warn!(
                    "Narrative step '{}' failed ({}), retrying with a simplified prompt",
                    step.name, first
                );
                let system = if step.description.is_empty() {
                    SIMPLIFIED_SYSTEM_PROMPT.to_string()
                } else {
                    step.description.clone()
                };
                let simplified = NarrativePrompt {
                    system,
                    user: self.utterance.clone(),
                    context: None,
                    session_id: self.session.session_id.clone(),
                };
                self.stream_narrative(step, simplified)
                    .await
                    .map(|text| json!({ "text": text }))
                    .map_err(|e| StepFailure::Error(format!("Narrative generation failed: {}", e)))
            }
        }
    }

    fn narrative_prompt(&self, step: &PlanStep) -> NarrativePrompt {
        let mut system = self.plan.instructions.trim().to_string();
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(&format!("## Current Step: {}\n", step.name));
        if !step.description.is_empty() {
            system.push_str(&step.description);
        }

        let context = if self.outputs.is_empty() {
            None
        } else {
            serde_json::to_string_pretty(&self.outputs).ok()
        };

        NarrativePrompt {
            system,
            user: self.utterance.clone(),
            context,
            session_id: self.session.session_id.clone(),
        }
    }

    async fn stream_narrative(
        &self,
        step: &PlanStep,
        prompt: NarrativePrompt,
    ) -> Result<String, NarrativeError> {
        let mut stream = self.inner.narrator.generate(prompt).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            text.push_str(&chunk);
            self.emit(ProgressEvent::Stream {
                step: step.name.clone(),
                chunk,
            })
            .await;
        }
        Ok(text)
    }

    // =========================================================================
    // Gate steps
    // =========================================================================

    async fn run_gate(
        &mut self,
        step: &PlanStep,
        template: Option<&str>,
    ) -> Result<Value, StepFailure> {
        let message = match template {
            Some(t) => paths::render_template(t, &self.outputs),
            None if !step.description.is_empty() => step.description.clone(),
            None => DEFAULT_GATE_MESSAGE.to_string(),
        };

        let inner = Arc::clone(&self.inner);
        let (responder, rx) = inner.broker.open(&self.state.task_id, &step.name, &message);
        let request_id = responder.request_id().to_string();
        info!("Gate '{}' waiting for confirmation ({})", step.name, request_id);

        // The timeout covers delivery of the request as well as the answer
        let deadline = Instant::now() + inner.settings.gate_timeout;
        let request = ProgressEvent::ConfirmationRequired {
            step: step.name.clone(),
            request_id: request_id.clone(),
            message,
            responder,
        };
        let undelivered = tokio::select! {
            _ = self.emit(request) => None,
            _ = tokio::time::sleep_until(deadline) => Some(GateOutcome::TimedOut),
            _ = self.cancel.cancelled() => Some(GateOutcome::Cancelled),
        };
        let outcome = match undelivered {
            Some(outcome) => {
                warn!("Gate '{}' request was never delivered", step.name);
                outcome
            }
            None => gate::wait(rx, deadline, &self.cancel).await,
        };
        inner.broker.close(&request_id);

        match outcome {
            GateOutcome::Approved => {
                info!("Gate '{}' approved", step.name);
                Ok(json!({ "confirmed": true }))
            }
            GateOutcome::Denied(reason) => {
                let summary = match reason {
                    Some(reason) => format!("Gate '{}' denied: {}", step.name, reason),
                    None => format!("Gate '{}' denied", step.name),
                };
                Err(StepFailure::Halt {
                    completion: StepCompletion::Denied,
                    summary,
                })
            }
            GateOutcome::TimedOut => Err(StepFailure::Halt {
                completion: StepCompletion::Timeout,
                summary: format!(
                    "Gate '{}' timed out after {}s without confirmation",
                    step.name,
                    inner.settings.gate_timeout.as_secs()
                ),
            }),
            GateOutcome::Cancelled => Err(StepFailure::Halt {
                completion: StepCompletion::Cancelled,
                summary: format!("Run cancelled while waiting at gate '{}'", step.name),
            }),
        }
    }

    // =========================================================================
    // Hooks and bookkeeping
    // =========================================================================

    async fn run_hook(&self, name: &str, phase: HookPhase) -> Result<(), HookError> {
        self.emit(ProgressEvent::HookStart {
            hook: name.to_string(),
            phase,
        })
        .await;

        let ctx = HookContext {
            plan_name: self.plan.name.clone(),
            run_id: self.state.task_id.clone(),
            phase,
            utterance: self.utterance.clone(),
            session: self.session.clone(),
        };
        let result = self.inner.hooks.run(name, &ctx).await;

        self.emit(ProgressEvent::HookComplete {
            hook: name.to_string(),
            phase,
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        })
        .await;
        result
    }

    async fn finish(
        mut self,
        outcome: TaskOutcome,
        summary: String,
        failed_step: Option<String>,
    ) -> RunState {
        let transition = match outcome {
            TaskOutcome::Completed => self.state.complete(),
            TaskOutcome::Failed | TaskOutcome::Aborted => self.state.fail(),
        };
        if let Err(e) = transition {
            error!("Run {} could not be finalised: {}", self.state.task_id, e);
        }
        self.persist().await;

        info!(
            "Run {} of '{}' finished {}: {}",
            self.state.task_id, self.plan.name, outcome, summary
        );
        self.emit(ProgressEvent::TaskComplete {
            task_id: self.state.task_id.clone(),
            task_name: self.plan.name.clone(),
            status: outcome,
            summary,
            failed_step,
        })
        .await;
        self.state
    }

    fn record(&mut self, result: StepResult) {
        if let Err(e) = self.state.record_step(result) {
            error!("Could not record step result: {}", e);
        }
    }

    fn count_steps(&self, status: StepStatus) -> usize {
        self.state
            .steps_completed
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    /// Persistence failures are logged; the run continues in memory
    async fn persist(&self) {
        let saved = store::save_blocking(Arc::clone(&self.inner.store), self.state.clone()).await;
        if let Err(e) = saved {
            warn!("Failed to persist run {}: {}", self.state.task_id, e);
        }
    }

    async fn emit(&self, event: ProgressEvent) {
        let kind = event.kind();
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped, '{}' not delivered", kind);
        }
    }
}

/// Merge the value at `path` into `args`.
///
/// Objects are merged key by key (resolved keys win); any other value lands
/// under `_resolved`.
fn merge_resolved(args: &mut Args, outputs: &StepOutputs, path: &str) {
    match paths::resolve(outputs, path) {
        Some(Value::Object(map)) => {
            for (key, value) in map {
                args.insert(key.clone(), value.clone());
            }
        }
        Some(other) => {
            args.insert("_resolved".to_string(), other.clone());
        }
        None => warn!("args_from path '{}' did not resolve, using static args", path),
    }
}

/// Supply conventional arguments a handler declares but the step omitted
fn inject_conventional(args: &mut Args, declared: &[String], session: &SessionContext) {
    for name in declared {
        if args.contains_key(name) {
            continue;
        }
        if let Some(value) = session.conventional_value(name) {
            args.insert(name.clone(), value);
        }
    }
}

fn infer_resource_type(operation: &str) -> &'static str {
    let op = operation.to_lowercase();
    if op.contains("vlan") {
        "vlan"
    } else if op.contains("firewall") {
        "firewall_rule"
    } else if op.contains("ssid") {
        "ssid"
    } else if op.contains("switch") {
        "switch_port"
    } else if op.contains("acl") {
        "acl"
    } else {
        "config"
    }
}

fn infer_resource_id(args: &Args) -> String {
    ["network_id", "vlan_id"]
        .iter()
        .find_map(|key| args.get(*key))
        .map(paths::scalar_text)
        .unwrap_or_default()
}
