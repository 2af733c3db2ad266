//! Closed vocabularies shared across the engine.
//!
//! Every enum here has one canonical lowercase spelling that is used both on
//! disk (serde) and in human-facing output (strum), so a value printed by the
//! CLI can be pasted back into a plan file or parsed from a run-state record.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Kind of a plan step as written in the plan header (`type:` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepKind {
    /// Invoke a registered operation handler
    #[strum(serialize = "tool")]
    #[serde(rename = "tool")]
    Operation,
    /// Produce streamed free text through the narrative collaborator
    #[strum(serialize = "agent")]
    #[serde(rename = "agent")]
    Narrative,
    /// Suspend until a human approves or denies
    #[strum(serialize = "gate")]
    #[serde(rename = "gate")]
    Gate,
}

/// Risk tier of a plan.
///
/// Ordering matters: the plan matcher breaks score ties towards the higher
/// tier, so `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[derive(Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Medium and High plans change device state
    #[inline]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Medium | Self::High)
    }
}

/// Lifecycle status of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl RunStatus {
    /// Completed, Failed and RolledBack never change again during execution
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

/// Status of a single step inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_step_kind_uses_plan_file_spelling() {
        assert_eq!(StepKind::Operation.to_string(), "tool");
        assert_eq!("agent".parse::<StepKind>().unwrap(), StepKind::Narrative);
        assert_eq!(
            serde_json::to_string(&StepKind::Gate).unwrap(),
            "\"gate\""
        );
    }

    #[test]
    fn test_risk_level_ordering_and_write_flag() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert!(!RiskLevel::Low.is_write());
        assert!(RiskLevel::Medium.is_write());
    }

    #[test]
    fn test_run_status_serde_matches_display() {
        for status in RunStatus::iter() {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
        assert_eq!(RunStatus::RolledBack.to_string(), "rolled_back");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::RolledBack.is_terminal());
    }
}
