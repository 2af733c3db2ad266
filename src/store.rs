//! Run-State Store
//!
//! Persists one `RunState` per run id. The file-backed store writes each
//! record as pretty JSON to `<root>/<run_id>.json` through a temporary file
//! and a rename, so a concurrent reader sees either the previous record or
//! the new one, never a torn write.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::RunState;
use crate::types::RunStatus;

/// Errors that can occur while persisting or loading run state
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Run '{run_id}' not found")]
    NotFound { run_id: String },

    #[error("Invalid run id '{run_id}'")]
    InvalidRunId { run_id: String },

    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt run record {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize run state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Background store task failed: {0}")]
    Background(String),
}

/// One line of `list` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub task_id: String,
    pub task_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub current_step: usize,
    pub changes: usize,
}

impl From<&RunState> for RunSummary {
    fn from(state: &RunState) -> Self {
        Self {
            task_id: state.task_id.clone(),
            task_name: state.task_name.clone(),
            status: state.status,
            started_at: state.started_at,
            current_step: state.current_step,
            changes: state.change_log.len(),
        }
    }
}

/// Durable storage for run state, keyed by run id
pub trait RunStateStore: Send + Sync {
    /// Persist the whole record, replacing any previous version
    fn save(&self, state: &RunState) -> Result<(), StoreError>;

    fn load(&self, run_id: &str) -> Result<RunState, StoreError>;

    /// Summaries of every stored run, oldest first
    fn list(&self) -> Result<Vec<RunSummary>, StoreError>;
}

/// Save on the blocking pool so file I/O never stalls a runtime worker
pub async fn save_blocking(
    store: Arc<dyn RunStateStore>,
    state: RunState,
) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || store.save(&state))
        .await
        .map_err(|e| StoreError::Background(e.to_string()))?
}

/// Load on the blocking pool
pub async fn load_blocking(
    store: Arc<dyn RunStateStore>,
    run_id: String,
) -> Result<RunState, StoreError> {
    tokio::task::spawn_blocking(move || store.load(&run_id))
        .await
        .map_err(|e| StoreError::Background(e.to_string()))?
}

/// Run ids become file names, so only a conservative alphabet is accepted
pub fn validate_run_id(run_id: &str) -> Result<(), StoreError> {
    let valid = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidRunId {
            run_id: run_id.to_string(),
        })
    }
}

/// Stores each run as `<root>/<run_id>.json`
#[derive(Debug, Clone)]
pub struct FileRunStore {
    root: PathBuf,
}

impl FileRunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store scoped to a device profile: `<base>/<profile>/`
    pub fn for_profile(base: impl AsRef<Path>, profile: Option<&str>) -> Self {
        match profile {
            Some(p) => Self::new(base.as_ref().join(p)),
            None => Self::new(base.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        validate_run_id(run_id)?;
        Ok(self.root.join(format!("{}.json", run_id)))
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl RunStateStore for FileRunStore {
    fn save(&self, state: &RunState) -> Result<(), StoreError> {
        let path = self.path_for(&state.task_id)?;
        fs::create_dir_all(&self.root).map_err(Self::io_err(&self.root))?;

        let json = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(Self::io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(Self::io_err(&path))?;

        debug!("Saved run {} ({}) to {:?}", state.task_id, state.status, path);
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<RunState, StoreError> {
        let path = self.path_for(run_id)?;
        if !path.exists() {
            return Err(StoreError::NotFound {
                run_id: run_id.to_string(),
            });
        }
        let content = fs::read_to_string(&path).map_err(Self::io_err(&path))?;
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt { path, source })
    }

    fn list(&self) -> Result<Vec<RunSummary>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(Self::io_err(&self.root))? {
            let path = entry.map_err(Self::io_err(&self.root))?.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let Some(run_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(run_id) {
                Ok(state) => runs.push(RunSummary::from(&state)),
                Err(e) => warn!("Skipping unreadable run record {:?}: {}", path, e),
            }
        }

        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(runs)
    }
}

/// In-process store for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<String, RunState>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStateStore for MemoryRunStore {
    fn save(&self, state: &RunState) -> Result<(), StoreError> {
        validate_run_id(&state.task_id)?;
        let mut runs = self.runs.write().map_err(|_| StoreError::Poisoned)?;
        runs.insert(state.task_id.clone(), state.clone());
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<RunState, StoreError> {
        let runs = self.runs.read().map_err(|_| StoreError::Poisoned)?;
        runs.get(run_id).cloned().ok_or_else(|| StoreError::NotFound {
            run_id: run_id.to_string(),
        })
    }

    fn list(&self) -> Result<Vec<RunSummary>, StoreError> {
        let runs = self.runs.read().map_err(|_| StoreError::Poisoned)?;
        let mut summaries: Vec<RunSummary> = runs.values().map(RunSummary::from).collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChangeRecord, StepResult};
    use crate::types::StepKind;
    use serde_json::json;

    fn sample_state() -> RunState {
        let mut state = RunState::new("configure-switching");
        state.start().unwrap();
        state.enter_step(1).unwrap();
        state
            .record_step(StepResult::started("discover", StepKind::Operation).complete(json!({"result": []})))
            .unwrap();
        state
            .record_change(ChangeRecord {
                operation: "create_vlan".to_string(),
                resource_type: "vlan".to_string(),
                resource_id: "N_1".to_string(),
                backup_path: None,
                timestamp: Utc::now(),
            })
            .unwrap();
        state
    }

    #[test]
    fn test_validate_run_id() {
        assert!(validate_run_id("3f2a-41_bc").is_ok());
        assert!(validate_run_id("").is_err());
        assert!(validate_run_id("../etc/passwd").is_err());
        assert!(validate_run_id("a/b").is_err());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path().join("runs"));
        let state = sample_state();

        store.save(&state).unwrap();
        let loaded = store.load(&state.task_id).unwrap();
        assert_eq!(loaded, state);
        assert!(!dir
            .path()
            .join("runs")
            .join(format!("{}.json.tmp", state.task_id))
            .exists());
    }

    #[test]
    fn test_file_store_overwrites_whole_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let mut state = sample_state();
        store.save(&state).unwrap();

        state.fail().unwrap();
        store.save(&state).unwrap();
        assert_eq!(store.load(&state.task_id).unwrap().status, RunStatus::Failed);
    }

    #[test]
    fn test_file_store_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        assert!(matches!(
            store.load("nope"),
            Err(StoreError::NotFound { .. })
        ));

        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        assert!(matches!(
            store.load("broken"),
            Err(StoreError::Corrupt { .. })
        ));
        // list skips the corrupt record
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_list_and_profile_scope() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::for_profile(dir.path(), Some("acme"));
        assert_eq!(store.root(), dir.path().join("acme"));
        assert!(store.list().unwrap().is_empty());

        let state = sample_state();
        store.save(&state).unwrap();
        let runs = store.list().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].task_id, state.task_id);
        assert_eq!(runs[0].changes, 1);
        assert_eq!(runs[0].current_step, 1);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryRunStore::new();
        let state = sample_state();
        store.save(&state).unwrap();
        assert_eq!(store.load(&state.task_id).unwrap(), state);
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(matches!(
            store.load("missing"),
            Err(StoreError::NotFound { .. })
        ));
    }
}
