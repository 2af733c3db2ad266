//! Safety collaborator
//!
//! The engine never decides on its own whether an operation is risky. It
//! asks a `SafetyGuard` to classify the call, to take a backup before any
//! mutating call, and later to undo a recorded change during rollback.
//!
//! `BackupSafetyGuard` is the file-backed implementation: a policy table
//! decides which operations need a backup, backups are JSON snapshots of the
//! call, and undo verifies the snapshot before handing it to an optional
//! restore handler.
//!
//! # Classification
//!
//! | Level     | Backup | Examples                                   |
//! |-----------|--------|--------------------------------------------|
//! | Safe      | no     | `discover_*`, `get_*`, `list_*`, `find_*`  |
//! | Moderate  | yes    | `create_vlan`, `configure_ssid`            |
//! | Dangerous | yes    | `delete_vlan`, `reboot_device`, unknown    |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::SessionContext;
use crate::plan::Args;
use crate::registry::OperationHandler;
use crate::state::ChangeRecord;

/// Errors raised by the safety collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SafetyError {
    #[error("Backup for '{operation}' failed: {reason}")]
    BackupFailed { operation: String, reason: String },

    #[error("No backup recorded for '{operation}'")]
    MissingBackup { operation: String },

    #[error("Backup file not found: {path}")]
    BackupNotFound { path: String },

    #[error("Undo of '{operation}' failed: {reason}")]
    UndoFailed { operation: String, reason: String },
}

/// Risk classification of a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Moderate,
    Dangerous,
}

impl SafetyLevel {
    #[inline]
    pub const fn backup_required(self) -> bool {
        matches!(self, Self::Moderate | Self::Dangerous)
    }
}

/// Result of classifying a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyCheck {
    pub level: SafetyLevel,
    pub backup_required: bool,
}

impl From<SafetyLevel> for SafetyCheck {
    fn from(level: SafetyLevel) -> Self {
        Self {
            level,
            backup_required: level.backup_required(),
        }
    }
}

/// Result of `before_operation`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackupOutcome {
    pub backup_created: bool,
    pub backup_path: Option<String>,
}

/// Consumed safety interface
#[async_trait]
pub trait SafetyGuard: Send + Sync {
    /// Classify an operation call
    fn classify(&self, operation: &str, args: &Args) -> SafetyCheck;

    /// Take a backup before a mutating call
    async fn before_operation(
        &self,
        operation: &str,
        args: &Args,
        session: &SessionContext,
    ) -> Result<BackupOutcome, SafetyError>;

    /// Reverse one recorded change
    async fn undo(
        &self,
        record: &ChangeRecord,
        session: &SessionContext,
    ) -> Result<Value, SafetyError>;
}

/// Operation name → safety level table
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    levels: HashMap<String, SafetyLevel>,
    safe_prefixes: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::network_defaults()
    }
}

impl SafetyPolicy {
    /// Empty policy: every operation is Dangerous
    pub fn strict() -> Self {
        Self {
            levels: HashMap::new(),
            safe_prefixes: Vec::new(),
        }
    }

    /// Policy covering the common network management operations
    pub fn network_defaults() -> Self {
        use SafetyLevel::*;

        let table: &[(&str, SafetyLevel)] = &[
            ("full_discovery", Safe),
            ("generate_report", Safe),
            ("generate_suggestions", Safe),
            ("save_snapshot", Safe),
            ("compare_snapshots", Safe),
            ("blink_leds", Safe),
            ("configure_ssid", Moderate),
            ("enable_ssid", Moderate),
            ("disable_ssid", Moderate),
            ("create_vlan", Moderate),
            ("update_vlan", Moderate),
            ("update_switch_port", Moderate),
            ("backup_config", Moderate),
            ("configure_alerts", Moderate),
            ("configure_snmp", Moderate),
            ("configure_syslog", Moderate),
            ("configure_port_forwarding", Moderate),
            ("configure_rf_profile", Moderate),
            ("add_firewall_rule", Dangerous),
            ("remove_firewall_rule", Dangerous),
            ("add_switch_acl", Dangerous),
            ("delete_vlan", Dangerous),
            ("rollback_config", Dangerous),
            ("reboot_device", Dangerous),
            ("configure_stp", Dangerous),
            ("schedule_firmware_upgrade", Dangerous),
        ];

        Self {
            levels: table
                .iter()
                .map(|(name, level)| (name.to_string(), *level))
                .collect(),
            safe_prefixes: ["discover_", "get_", "list_", "find_"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    /// Override the level of one operation
    pub fn with_level(mut self, operation: impl Into<String>, level: SafetyLevel) -> Self {
        self.levels.insert(operation.into(), level);
        self
    }

    /// Explicit entries win, then read-only prefixes; anything else is Dangerous
    pub fn level_of(&self, operation: &str) -> SafetyLevel {
        if let Some(level) = self.levels.get(operation) {
            return *level;
        }
        if self.safe_prefixes.iter().any(|p| operation.starts_with(p)) {
            return SafetyLevel::Safe;
        }
        SafetyLevel::Dangerous
    }
}

/// Snapshot written before a mutating call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub operation: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub session_id: String,
    pub profile: Option<String>,
    pub args: Args,
}

/// File-backed `SafetyGuard`
pub struct BackupSafetyGuard {
    policy: SafetyPolicy,
    backup_dir: PathBuf,
    restorer: Option<Arc<dyn OperationHandler>>,
}

impl BackupSafetyGuard {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            policy: SafetyPolicy::default(),
            backup_dir: backup_dir.into(),
            restorer: None,
        }
    }

    pub fn with_policy(mut self, policy: SafetyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handler that applies a verified backup during undo.
    ///
    /// It receives `operation`, `resource_type`, `resource_id` and `backup`.
    pub fn with_restorer(mut self, restorer: Arc<dyn OperationHandler>) -> Self {
        self.restorer = Some(restorer);
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn dir_for(&self, session: &SessionContext) -> PathBuf {
        match &session.profile {
            Some(profile) => self.backup_dir.join(profile),
            None => self.backup_dir.clone(),
        }
    }
}

#[async_trait]
impl SafetyGuard for BackupSafetyGuard {
    fn classify(&self, operation: &str, _args: &Args) -> SafetyCheck {
        self.policy.level_of(operation).into()
    }

    async fn before_operation(
        &self,
        operation: &str,
        args: &Args,
        session: &SessionContext,
    ) -> Result<BackupOutcome, SafetyError> {
        if !self.classify(operation, args).backup_required {
            return Ok(BackupOutcome::default());
        }

        let failed = |reason: String| SafetyError::BackupFailed {
            operation: operation.to_string(),
            reason,
        };

        let dir = self.dir_for(session);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        let path = dir.join(format!(
            "backup_{}_{}_{}.json",
            operation,
            now.format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        ));

        let record = BackupRecord {
            operation: operation.to_string(),
            timestamp: now,
            session_id: session.session_id.clone(),
            profile: session.profile.clone(),
            args: args.clone(),
        };
        let json = serde_json::to_string_pretty(&record).map_err(|e| failed(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| failed(e.to_string()))?;

        info!("Backup created: {:?}", path);
        Ok(BackupOutcome {
            backup_created: true,
            backup_path: Some(path.to_string_lossy().into_owned()),
        })
    }

    async fn undo(
        &self,
        record: &ChangeRecord,
        _session: &SessionContext,
    ) -> Result<Value, SafetyError> {
        let path = record
            .backup_path
            .as_deref()
            .ok_or_else(|| SafetyError::MissingBackup {
                operation: record.operation.clone(),
            })?;

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SafetyError::BackupNotFound {
                    path: path.to_string(),
                });
            }
            Err(e) => {
                return Err(SafetyError::UndoFailed {
                    operation: record.operation.clone(),
                    reason: e.to_string(),
                });
            }
        };
        let backup: BackupRecord =
            serde_json::from_str(&content).map_err(|e| SafetyError::UndoFailed {
                operation: record.operation.clone(),
                reason: format!("unreadable backup {}: {}", path, e),
            })?;

        let Some(restorer) = &self.restorer else {
            warn!(
                "No restore handler configured; backup {} verified but not applied",
                path
            );
            return Ok(json!({
                "restored": false,
                "backup_path": path,
                "message": format!("Backup verified for {}", record.operation),
            }));
        };

        let mut args = Args::new();
        args.insert("operation".to_string(), json!(record.operation));
        args.insert("resource_type".to_string(), json!(record.resource_type));
        args.insert("resource_id".to_string(), json!(record.resource_id));
        args.insert(
            "backup".to_string(),
            serde_json::to_value(&backup).map_err(|e| SafetyError::UndoFailed {
                operation: record.operation.clone(),
                reason: e.to_string(),
            })?,
        );

        let result = restorer
            .call(args)
            .await
            .map_err(|e| SafetyError::UndoFailed {
                operation: record.operation.clone(),
                reason: e.to_string(),
            })?;

        info!("Configuration restored from {}", path);
        Ok(json!({
            "restored": true,
            "backup_path": path,
            "result": result,
        }))
    }
}
