//! Plan Definitions
//!
//! A plan is a named, ordered recipe of steps authored as a markdown file with
//! a YAML header. Plans are loaded once, validated, and then shared read-only
//! (`Arc<PlanDefinition>`) between every run that executes them.
//!
//! # Design Principles
//!
//! - **Closed step set**: a step is exactly one of Operation, Narrative or
//!   Gate, so the executor matches exhaustively on `StepAction`
//! - **Validated at load time**: duplicate step names, forward references and
//!   malformed conditions are rejected before a plan can ever run
//! - **Immutable once shared**: nothing in the engine mutates a loaded plan
//!
//! # Plan File Format
//!
//! ```text
//! ---
//! name: configure-switching
//! description: Create a VLAN and assign it to access ports
//! capability: config-specialist
//! risk_level: high
//! trigger_keywords: [vlan, switch port, configure vlan]
//! hooks:
//!   pre: snapshot_inventory
//! steps:
//!   - name: discover
//!     type: tool
//!     tool: get_switch_ports
//!     args: { network_id: N_1 }
//!   - name: approve
//!     type: gate
//!     message_template: "Apply VLAN to {discover.result.count} ports?"
//!   - name: apply
//!     type: tool
//!     tool: update_switch_port
//!     args_from: discover.result
//! ---
//! Free-text instructions handed to narrative steps.
//! ```

pub mod catalog;
pub mod condition;
pub mod loader;
pub mod matcher;

use std::collections::HashSet;
use std::path::PathBuf;

use crate::engine::paths;
use crate::types::{RiskLevel, StepKind};

pub use catalog::PlanCatalog;
pub use condition::Condition;
pub use loader::ParseError;

/// Keyword arguments passed to operation handlers
pub type Args = serde_json::Map<String, serde_json::Value>;

/// What a step does when it runs
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Invoke a registered operation
    Operation {
        operation: String,
        args: Args,
        /// Dot path into earlier step outputs, merged over `args`
        args_from: Option<String>,
    },
    /// Stream free text from the narrative collaborator
    Narrative,
    /// Wait for a human decision
    Gate {
        /// `{path}` placeholders are filled from earlier step outputs
        message_template: Option<String>,
    },
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    /// Unique within the plan; also the key under which its output is stored
    pub name: String,
    pub description: String,
    pub condition: Option<Condition>,
    pub action: StepAction,
}

impl PlanStep {
    /// An operation step with no static arguments
    pub fn operation(name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            condition: None,
            action: StepAction::Operation {
                operation: operation.into(),
                args: Args::new(),
                args_from: None,
            },
        }
    }

    /// A narrative step
    pub fn narrative(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            condition: None,
            action: StepAction::Narrative,
        }
    }

    /// A gate step using the default confirmation message
    pub fn gate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            condition: None,
            action: StepAction::Gate {
                message_template: None,
            },
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set static arguments. Non-object values are ignored.
    pub fn with_args(mut self, value: serde_json::Value) -> Self {
        if let (StepAction::Operation { args, .. }, serde_json::Value::Object(map)) =
            (&mut self.action, value)
        {
            *args = map;
        }
        self
    }

    pub fn with_args_from(mut self, path: impl Into<String>) -> Self {
        if let StepAction::Operation { args_from, .. } = &mut self.action {
            *args_from = Some(path.into());
        }
        self
    }

    pub fn with_message(mut self, template: impl Into<String>) -> Self {
        if let StepAction::Gate { message_template } = &mut self.action {
            *message_template = Some(template.into());
        }
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    #[inline]
    pub fn kind(&self) -> StepKind {
        match self.action {
            StepAction::Operation { .. } => StepKind::Operation,
            StepAction::Narrative => StepKind::Narrative,
            StepAction::Gate { .. } => StepKind::Gate,
        }
    }

    /// Dot paths this step reads from earlier outputs
    fn references(&self) -> impl Iterator<Item = &str> {
        let from = match &self.action {
            StepAction::Operation { args_from, .. } => args_from.as_deref(),
            _ => None,
        };
        self.condition.as_ref().map(Condition::path).into_iter().chain(from)
    }
}

/// Named lifecycle hooks run around the step sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanHooks {
    pub pre: Option<String>,
    pub post: Option<String>,
}

/// A fully validated plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDefinition {
    pub name: String,
    pub description: String,
    /// Capability that owns this plan (used as the classification result)
    pub capability: String,
    /// Lowercased trigger keywords; entries containing spaces are phrases
    pub triggers: Vec<String>,
    pub risk_level: RiskLevel,
    pub steps: Vec<PlanStep>,
    pub hooks: PlanHooks,
    /// Markdown body, used as context for narrative steps
    pub instructions: String,
    /// File the plan was loaded from, if any
    pub origin: Option<PathBuf>,
}

impl PlanDefinition {
    /// Start building a plan programmatically
    pub fn builder(name: impl Into<String>, capability: impl Into<String>) -> PlanBuilder {
        PlanBuilder::new(name, capability)
    }

    /// Look up a step by name
    pub fn step(&self, name: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Check the structural invariants every plan must satisfy.
///
/// Step names are unique, and every dot path used by a condition or
/// `args_from` starts with the name of a step that appears earlier.
pub(crate) fn validate_steps(steps: &[PlanStep]) -> Result<(), ParseError> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(steps.len());

    for step in steps {
        for path in step.references() {
            let head = paths::head_segment(path);
            if !seen.contains(head) {
                let reason = if head == step.name {
                    "references itself"
                } else if steps.iter().any(|s| s.name == head) {
                    "references a later step"
                } else {
                    "references an unknown step"
                };
                return Err(ParseError::InvalidReference {
                    step: step.name.clone(),
                    path: path.to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        if !seen.insert(step.name.as_str()) {
            return Err(ParseError::DuplicateStep {
                name: step.name.clone(),
            });
        }
    }

    Ok(())
}

/// Builder for plans defined in code
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    plan: PlanDefinition,
    conditions: Vec<(usize, String)>,
}

impl PlanBuilder {
    pub fn new(name: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            plan: PlanDefinition {
                name: name.into(),
                description: String::new(),
                capability: capability.into(),
                triggers: Vec::new(),
                risk_level: RiskLevel::Low,
                steps: Vec::new(),
                hooks: PlanHooks::default(),
                instructions: String::new(),
                origin: None,
            },
            conditions: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.plan.description = description.into();
        self
    }

    pub fn trigger(mut self, keyword: impl Into<String>) -> Self {
        let keyword = keyword.into().trim().to_lowercase();
        if !keyword.is_empty() {
            self.plan.triggers.push(keyword);
        }
        self
    }

    pub fn risk(mut self, level: RiskLevel) -> Self {
        self.plan.risk_level = level;
        self
    }

    pub fn step(mut self, step: PlanStep) -> Self {
        self.plan.steps.push(step);
        self
    }

    /// Add a step guarded by a condition expression (parsed at `build`)
    pub fn step_when(mut self, step: PlanStep, condition: impl Into<String>) -> Self {
        self.conditions.push((self.plan.steps.len(), condition.into()));
        self.plan.steps.push(step);
        self
    }

    pub fn pre_hook(mut self, hook: impl Into<String>) -> Self {
        self.plan.hooks.pre = Some(hook.into());
        self
    }

    pub fn post_hook(mut self, hook: impl Into<String>) -> Self {
        self.plan.hooks.post = Some(hook.into());
        self
    }

    pub fn instructions(mut self, body: impl Into<String>) -> Self {
        self.plan.instructions = body.into();
        self
    }

    /// Parse deferred conditions and validate the plan
    pub fn build(mut self) -> Result<PlanDefinition, ParseError> {
        if self.plan.name.trim().is_empty() || self.plan.capability.trim().is_empty() {
            let mut fields = Vec::new();
            if self.plan.name.trim().is_empty() {
                fields.push("name".to_string());
            }
            if self.plan.capability.trim().is_empty() {
                fields.push("capability".to_string());
            }
            return Err(ParseError::MissingFields { fields });
        }

        for (index, expr) in self.conditions.drain(..) {
            let step = &mut self.plan.steps[index];
            let condition = Condition::parse(&expr).map_err(|e| ParseError::InvalidCondition {
                step: step.name.clone(),
                reason: e.to_string(),
            })?;
            step.condition = Some(condition);
        }

        validate_steps(&self.plan.steps)?;
        Ok(self.plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // PlanStep Tests
    // =========================================================================

    #[test]
    fn test_step_kinds() {
        assert_eq!(PlanStep::operation("a", "get_vlans").kind(), StepKind::Operation);
        assert_eq!(PlanStep::narrative("b").kind(), StepKind::Narrative);
        assert_eq!(PlanStep::gate("c").kind(), StepKind::Gate);
    }

    #[test]
    fn test_with_args_only_applies_to_operations() {
        let step = PlanStep::operation("a", "get_vlans").with_args(json!({"network_id": "N_1"}));
        match &step.action {
            StepAction::Operation { args, .. } => assert_eq!(args["network_id"], "N_1"),
            other => panic!("unexpected action {:?}", other),
        }

        let gate = PlanStep::gate("g").with_args(json!({"x": 1}));
        assert_eq!(gate.action, StepAction::Gate { message_template: None });
    }

    // =========================================================================
    // Builder Validation Tests
    // =========================================================================

    #[test]
    fn test_builder_accepts_backward_references() {
        let plan = PlanDefinition::builder("p", "network-analyst")
            .step(PlanStep::operation("discover", "discover_devices"))
            .step_when(
                PlanStep::operation("fix", "reboot_device").with_args_from("discover.result"),
                "discover.result.offline",
            )
            .build()
            .unwrap();

        assert!(plan.step("fix").unwrap().condition.is_some());
    }

    #[test]
    fn test_builder_rejects_duplicate_step_names() {
        let err = PlanDefinition::builder("p", "network-analyst")
            .step(PlanStep::narrative("summary"))
            .step(PlanStep::narrative("summary"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::DuplicateStep {
                name: "summary".to_string()
            }
        );
    }

    #[test]
    fn test_builder_rejects_forward_reference() {
        let err = PlanDefinition::builder("p", "network-analyst")
            .step(PlanStep::operation("first", "get_vlans").with_args_from("second.result"))
            .step(PlanStep::operation("second", "get_vlans"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidReference { ref reason, .. } if reason == "references a later step"
        ));
    }

    #[test]
    fn test_builder_rejects_self_and_unknown_references() {
        let err = PlanDefinition::builder("p", "network-analyst")
            .step_when(PlanStep::narrative("loop"), "loop.text")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("references itself"));

        let err = PlanDefinition::builder("p", "network-analyst")
            .step_when(PlanStep::narrative("a"), "nowhere.value == 1")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown step"));
    }

    #[test]
    fn test_builder_requires_name_and_capability() {
        let err = PlanDefinition::builder("", "").build().unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingFields {
                fields: vec!["name".to_string(), "capability".to_string()]
            }
        );
    }

    #[test]
    fn test_builder_lowercases_triggers() {
        let plan = PlanDefinition::builder("p", "c")
            .trigger(" VLAN ")
            .trigger("")
            .build()
            .unwrap();
        assert_eq!(plan.triggers, vec!["vlan"]);
    }
}
