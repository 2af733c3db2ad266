//! Integration tests for plan files on disk
//!
//! Tests cover:
//! - Directory scans (nested directories, non-markdown files, broken files)
//! - Duplicate plan names and catalog reloads
//! - Load-time validation of steps, references and conditions

use std::fs;
use std::path::Path;

use netops::plan::loader;
use netops::{Condition, ParseError, PlanCatalog, RiskLevel, StepAction, StepKind};

const VLAN_PLAN: &str = r#"---
name: configure-switching
description: Create a VLAN and put access ports on it
capability: config-specialist
risk_level: high
trigger_keywords: [vlan, "switch port", Configure]
hooks:
  pre: lock_network
  post: notify_noc
steps:
  - name: backup_current_state
    type: tool
    tool: backup_config
    args: { network_id: N_1 }
  - name: discover
    type: tool
    tool: get_switch_ports
    args: { network_id: N_1 }
  - name: generate_preview
    type: agent
    description: Describe the VLAN change
  - name: confirm
    type: gate
    message_template: "Apply? {generate_preview.text}"
  - name: apply_changes
    type: tool
    tool: update_switch_port
    args_from: discover.result
    condition: discover.result.ports
  - name: verify
    type: tool
    tool: get_switch_ports
    condition: "apply_changes.success == true"
---

# Switching changes

Explain every port that will change.
"#;

fn write(dir: &Path, relative: &str, text: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

fn minimal(name: &str, body: &str) -> String {
    format!("---\nname: {}\ncapability: network-analyst\n{}---\n", name, body)
}

// =============================================================================
// Single file
// =============================================================================

#[test]
fn test_load_complete_plan_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "configure-switching.md", VLAN_PLAN);

    let plan = loader::load(dir.path().join("configure-switching.md")).unwrap();
    assert_eq!(plan.name, "configure-switching");
    assert_eq!(plan.risk_level, RiskLevel::High);
    assert_eq!(plan.triggers, vec!["vlan", "switch port", "configure"]);
    assert_eq!(plan.hooks.pre.as_deref(), Some("lock_network"));
    assert_eq!(plan.hooks.post.as_deref(), Some("notify_noc"));
    assert!(plan.instructions.starts_with("# Switching changes"));
    assert!(plan.origin.is_some());

    let kinds: Vec<StepKind> = plan.steps.iter().map(|s| s.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            StepKind::Operation,
            StepKind::Operation,
            StepKind::Narrative,
            StepKind::Gate,
            StepKind::Operation,
            StepKind::Operation,
        ]
    );

    let apply = plan.step("apply_changes").unwrap();
    assert_eq!(
        apply.condition,
        Some(Condition::Truthy {
            path: "discover.result.ports".to_string()
        })
    );
    match &apply.action {
        StepAction::Operation { args_from, .. } => {
            assert_eq!(args_from.as_deref(), Some("discover.result"));
        }
        other => panic!("unexpected action {:?}", other),
    }
    assert_eq!(
        plan.step("verify").unwrap().condition,
        Some(Condition::Equals {
            path: "apply_changes.success".to_string(),
            literal: "true".to_string()
        })
    );
}

#[test]
fn test_agent_field_names_capability() {
    let plan = loader::parse("---\nname: p\nagent: workflow-creator\n---\n").unwrap();
    assert_eq!(plan.capability, "workflow-creator");
    assert_eq!(plan.risk_level, RiskLevel::Low);
    assert!(plan.steps.is_empty());
}

#[test]
fn test_missing_required_fields_are_listed() {
    let err = loader::parse("---\ndescription: nothing useful\n---\n").unwrap_err();
    assert_eq!(
        err,
        ParseError::MissingFields {
            fields: vec!["name".to_string(), "capability".to_string()]
        }
    );
    assert_eq!(err.to_string(), "Missing required fields: name, capability");
}

#[test]
fn test_unknown_risk_level_is_an_error() {
    let err = loader::parse(&minimal("p", "risk_level: extreme\n")).unwrap_err();
    assert_eq!(
        err,
        ParseError::UnknownRiskLevel {
            value: "extreme".to_string()
        }
    );
}

#[test]
fn test_forward_and_unknown_references_rejected() {
    let forward = minimal(
        "p",
        "steps:\n  - name: a\n    type: tool\n    tool: x\n    args_from: b.result\n  - name: b\n    type: tool\n    tool: y\n",
    );
    match loader::parse(&forward).unwrap_err() {
        ParseError::InvalidReference { step, reason, .. } => {
            assert_eq!(step, "a");
            assert_eq!(reason, "references a later step");
        }
        other => panic!("unexpected error {:?}", other),
    }

    let unknown = minimal(
        "p",
        "steps:\n  - name: a\n    type: agent\n    condition: ghost.result\n",
    );
    assert!(matches!(
        loader::parse(&unknown).unwrap_err(),
        ParseError::InvalidReference { ref reason, .. } if reason == "references an unknown step"
    ));

    let own = minimal(
        "p",
        "steps:\n  - name: a\n    type: tool\n    tool: x\n    condition: a.success\n",
    );
    assert!(matches!(
        loader::parse(&own).unwrap_err(),
        ParseError::InvalidReference { ref reason, .. } if reason == "references itself"
    ));
}

#[test]
fn test_composite_condition_rejected() {
    let text = minimal(
        "p",
        "steps:\n  - name: a\n    type: tool\n    tool: x\n  - name: b\n    type: gate\n    condition: a.success == true and a.result\n",
    );
    assert!(matches!(
        loader::parse(&text).unwrap_err(),
        ParseError::InvalidCondition { ref step, .. } if step == "b"
    ));
}

#[test]
fn test_step_shape_errors() {
    let no_tool = minimal("p", "steps:\n  - name: a\n    type: tool\n");
    assert!(matches!(
        loader::parse(&no_tool).unwrap_err(),
        ParseError::InvalidStep { index: 0, .. }
    ));

    let bad_type = minimal("p", "steps:\n  - name: a\n    type: shell\n");
    assert!(loader::parse(&bad_type)
        .unwrap_err()
        .to_string()
        .contains("invalid type 'shell'"));

    let duplicate = minimal(
        "p",
        "steps:\n  - name: a\n    type: gate\n  - name: a\n    type: gate\n",
    );
    assert_eq!(
        loader::parse(&duplicate).unwrap_err(),
        ParseError::DuplicateStep {
            name: "a".to_string()
        }
    );
}

// =============================================================================
// Directory scans
// =============================================================================

#[test]
fn test_scan_recurses_and_skips_invalid_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "configure-switching.md", VLAN_PLAN);
    write(dir.path(), "nested/deeper/health.md", &minimal("health", ""));
    write(dir.path(), "nested/broken.md", "no frontmatter here");
    write(dir.path(), "nested/empty.md", "");
    write(dir.path(), "README.txt", &minimal("ignored", ""));

    let report = loader::scan(&[dir.path()]);
    let mut names: Vec<&str> = report.plans.iter().map(|p| p.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["configure-switching", "health"]);

    assert_eq!(report.failures.len(), 2);
    let errors: Vec<&ParseError> = report.failures.iter().map(|(_, e)| e).collect();
    assert!(errors.contains(&&ParseError::MissingFrontmatter));
    assert!(errors.contains(&&ParseError::Empty));
}

#[test]
fn test_missing_directory_yields_empty_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = PlanCatalog::load(&[dir.path().join("absent")]);
    assert!(catalog.is_empty());
}

#[test]
fn test_duplicate_names_keep_first_in_path_order() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.md", &minimal("audit", "description: first\n"));
    write(dir.path(), "b.md", &minimal("audit", "description: second\n"));

    let catalog = PlanCatalog::load(&[dir.path()]);
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog.get("audit").unwrap().description, "first");
}

#[test]
fn test_reload_sees_edits() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "health.md", &minimal("health", ""));
    let catalog = PlanCatalog::load(&[dir.path()]);
    assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["health"]);

    write(dir.path(), "configure-switching.md", VLAN_PLAN);
    fs::remove_file(dir.path().join("health.md")).unwrap();

    let fresh = catalog.reload();
    assert_eq!(fresh.names().collect::<Vec<_>>(), vec!["configure-switching"]);
    // the original catalog is untouched
    assert_eq!(catalog.len(), 1);
    assert!(catalog.get("health").is_some());
}
