//! Engine configuration file handling.
//!
//! Configuration is a JSON file in which every field is optional; missing
//! fields take the defaults below. Paths are relative to the working
//! directory unless given absolute.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::classifier::DEFAULT_MAX_UTTERANCE_LEN;

/// Engine settings that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory scanned (recursively) for plan files
    pub plans_dir: PathBuf,
    /// Directory holding one JSON record per run
    pub state_dir: PathBuf,
    /// Directory the backup guard writes snapshots to
    pub backup_dir: PathBuf,
    pub gate_timeout_secs: u64,
    pub use_plan_matching: bool,
    /// Device profile that scopes run state and backups
    pub active_profile: Option<String>,
    pub max_utterance_len: usize,
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plans_dir: PathBuf::from("tasks"),
            state_dir: PathBuf::from("task-runs"),
            backup_dir: PathBuf::from("backups"),
            gate_timeout_secs: 300,
            use_plan_matching: true,
            active_profile: None,
            max_utterance_len: DEFAULT_MAX_UTTERANCE_LEN,
            event_buffer: 64,
        }
    }
}

impl EngineConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults; validate either way
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (field, path) in [
            ("plans_dir", &self.plans_dir),
            ("state_dir", &self.state_dir),
            ("backup_dir", &self.backup_dir),
        ] {
            if path.as_os_str().is_empty() {
                anyhow::bail!("{} must not be empty", field);
            }
        }

        if self.gate_timeout_secs == 0 {
            anyhow::bail!("gate_timeout_secs must be greater than zero");
        }
        if self.max_utterance_len == 0 {
            anyhow::bail!("max_utterance_len must be greater than zero");
        }
        if self.event_buffer == 0 {
            anyhow::bail!("event_buffer must be greater than zero");
        }

        // Profile names become directory names
        if let Some(profile) = &self.active_profile {
            let valid = !profile.is_empty()
                && profile
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                anyhow::bail!(
                    "active_profile '{}' may only contain letters, numbers, '-' and '_'",
                    profile
                );
            }
        }

        Ok(())
    }

    /// Backup directory root (the guard adds the profile itself)
    pub fn backup_root(&self) -> &Path {
        &self.backup_dir
    }
}
