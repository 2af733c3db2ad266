//! Rollback of recorded changes.
//!
//! Walks a run's change log newest-first and asks the safety collaborator
//! to undo each entry. A failed undo is recorded in the report and the walk
//! continues; the run ends up RolledBack either way so an operator can see
//! exactly which entries still need manual attention.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::SessionContext;
use crate::safety::SafetyGuard;
use crate::state::{RunState, RunTransitionError};
use crate::types::RunStatus;

/// Result of undoing one change record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndoOutcome {
    pub operation: String,
    pub resource_type: String,
    pub resource_id: String,
    pub backup_path: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-entry outcome of a rollback, newest change first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackReport {
    pub run_id: String,
    pub task_name: String,
    pub status: RunStatus,
    pub entries: Vec<UndoOutcome>,
}

impl RollbackReport {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.success).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    /// Every recorded change was undone
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }
}

/// Undo every change of a run in reverse order and mark it RolledBack.
///
/// Fails only when the run was already rolled back; undo failures are
/// reported per entry.
pub async fn rollback(
    state: &mut RunState,
    guard: &dyn SafetyGuard,
    session: &SessionContext,
) -> Result<RollbackReport, RunTransitionError> {
    if state.status == RunStatus::RolledBack {
        return Err(RunTransitionError::AlreadyRolledBack {
            run_id: state.task_id.clone(),
        });
    }

    info!(
        "Rolling back run {} ({} change(s))",
        state.task_id,
        state.change_log.len()
    );

    let mut entries = Vec::with_capacity(state.change_log.len());
    for record in state.change_log.iter().rev() {
        let outcome = guard.undo(record, session).await;
        let (success, result, error) = match outcome {
            Ok(value) => (true, Some(value), None),
            Err(e) => {
                warn!("Undo of '{}' failed: {}", record.operation, e);
                (false, None, Some(e.to_string()))
            }
        };
        entries.push(UndoOutcome {
            operation: record.operation.clone(),
            resource_type: record.resource_type.clone(),
            resource_id: record.resource_id.clone(),
            backup_path: record.backup_path.clone(),
            success,
            result,
            error,
        });
    }

    state.mark_rolled_back()?;

    let report = RollbackReport {
        run_id: state.task_id.clone(),
        task_name: state.task_name.clone(),
        status: state.status,
        entries,
    };
    info!(
        "Rollback of {} finished: {} undone, {} failed",
        report.run_id,
        report.succeeded(),
        report.failed()
    );
    Ok(report)
}
