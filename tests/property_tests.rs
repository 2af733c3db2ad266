//! Property-Based Tests for netops
//!
//! Uses proptest for testing invariants and edge cases
//!
//! These tests verify:
//! - Enum string round-trips (parse → to_string → parse)
//! - The plan matcher never routes analysis-only requests to write plans
//! - Condition evaluation, dot paths and utterance sanitizing
//! - Run state survives the file store unchanged

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use strum::IntoEnumIterator;

// =============================================================================
// Enum Property Tests
// =============================================================================

use netops::types::{RiskLevel, RunStatus, StepKind, StepStatus};

/// Strategy for generating valid RiskLevel variants
fn risk_strategy() -> impl Strategy<Value = RiskLevel> {
    prop_oneof![
        Just(RiskLevel::Low),
        Just(RiskLevel::Medium),
        Just(RiskLevel::High),
    ]
}

fn run_status_strategy() -> impl Strategy<Value = RunStatus> {
    proptest::sample::select(RunStatus::iter().collect::<Vec<_>>())
}

fn step_status_strategy() -> impl Strategy<Value = StepStatus> {
    proptest::sample::select(StepStatus::iter().collect::<Vec<_>>())
}

fn step_kind_strategy() -> impl Strategy<Value = StepKind> {
    proptest::sample::select(StepKind::iter().collect::<Vec<_>>())
}

proptest! {
    /// RiskLevel: to_string → parse round-trip is identity
    #[test]
    fn risk_level_roundtrip(level in risk_strategy()) {
        let s = level.to_string();
        let parsed: RiskLevel = s.parse().expect("Should parse");
        prop_assert_eq!(level, parsed);
        prop_assert_eq!(s.clone(), s.to_lowercase());
    }

    /// RunStatus: Display and serde agree on the spelling
    #[test]
    fn run_status_display_matches_json(status in run_status_strategy()) {
        let json = serde_json::to_string(&status).unwrap();
        prop_assert_eq!(json, format!("\"{}\"", status));
        let parsed: RunStatus = status.to_string().parse().expect("Should parse");
        prop_assert_eq!(status, parsed);
    }

    /// StepStatus: to_string → parse round-trip is identity
    #[test]
    fn step_status_roundtrip(status in step_status_strategy()) {
        let parsed: StepStatus = status.to_string().parse().expect("Should parse");
        prop_assert_eq!(status, parsed);
    }

    /// StepKind: the plan-file spelling parses back and matches serde
    #[test]
    fn step_kind_roundtrip(kind in step_kind_strategy()) {
        let s = kind.to_string();
        prop_assert!(["tool", "agent", "gate"].contains(&s.as_str()));
        let parsed: StepKind = s.parse().expect("Should parse");
        prop_assert_eq!(kind, parsed);
        prop_assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{}\"", s));
    }

    /// Only Medium and High are write tiers, and they outrank Low
    #[test]
    fn risk_level_write_tiers(level in risk_strategy()) {
        prop_assert_eq!(level.is_write(), level > RiskLevel::Low);
    }
}

// =============================================================================
// Plan Matcher Property Tests
// =============================================================================

use netops::plan::matcher;
use netops::verbs::ANALYSIS_VERBS;
use netops::PlanDefinition;

const NOUNS: &[&str] = &[
    "vlan", "ssid", "firewall", "switch", "port", "device", "network", "camera", "uplink",
];

fn noun_strategy() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(NOUNS.to_vec())
}

fn plan_strategy() -> impl Strategy<Value = PlanDefinition> {
    (
        "[a-z]{3,10}",
        risk_strategy(),
        proptest::collection::vec(noun_strategy(), 1..4),
    )
        .prop_map(|(name, risk, triggers)| {
            let mut builder = PlanDefinition::builder(name, "network-analyst").risk(risk);
            for trigger in triggers {
                builder = builder.trigger(trigger);
            }
            builder.build().expect("generated plan is valid")
        })
}

fn analysis_utterance() -> impl Strategy<Value = String> {
    (
        proptest::sample::select(ANALYSIS_VERBS.to_vec()),
        proptest::collection::vec(noun_strategy(), 0..5),
    )
        .prop_map(|(verb, nouns)| format!("{} {}", verb, nouns.join(" the ")))
}

proptest! {
    /// An analysis-only request never selects a Medium or High plan
    #[test]
    fn analysis_never_selects_write_plan(
        plans in proptest::collection::vec(plan_strategy(), 0..8),
        utterance in analysis_utterance(),
    ) {
        if let Some(plan) = matcher::find_best(plans.iter(), &utterance) {
            prop_assert_eq!(plan.risk_level, RiskLevel::Low);
        }
    }

    /// A selected plan always shares at least one trigger with the request
    #[test]
    fn selected_plan_has_keyword_hit(
        plans in proptest::collection::vec(plan_strategy(), 1..8),
        nouns in proptest::collection::vec(noun_strategy(), 1..4),
    ) {
        let utterance = format!("configure {}", nouns.join(" "));
        if let Some(m) = matcher::best_match(plans.iter(), &utterance) {
            prop_assert!(m.keyword_hits >= 1);
            prop_assert!(m.keyword_hits >= 2 || m.verb_match);
            prop_assert!(m.plan.triggers.iter().any(|t| nouns.contains(&t.as_str())));
        }
    }
}

// =============================================================================
// Conditions and Dot Paths
// =============================================================================

use netops::engine::paths;
use netops::Condition;

fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z0-9]{0,6}".prop_map(Value::String),
    ]
}

fn outputs_with(value: Value) -> Map<String, Value> {
    let mut outputs = Map::new();
    outputs.insert("scan".to_string(), json!({ "result": { "field": value }, "success": true }));
    outputs
}

proptest! {
    /// `!=` is always the complement of `==` for the same operands
    #[test]
    fn not_equals_complements_equals(value in scalar_strategy(), literal in "[xyz][0-9]{0,3}|true|false|[0-9]{1,3}") {
        let outputs = outputs_with(value);
        let eq = Condition::parse(&format!("scan.result.field == {}", literal)).unwrap();
        let ne = Condition::parse(&format!("scan.result.field != {}", literal)).unwrap();
        prop_assert_ne!(eq.evaluate(&outputs), ne.evaluate(&outputs));
    }

    /// Evaluation is a pure function of the outputs
    #[test]
    fn condition_evaluation_is_deterministic(value in scalar_strategy(), path in "scan(\\.(result|success|field|missing)){0,3}") {
        let outputs = outputs_with(value);
        let condition = Condition::parse(&path).unwrap();
        let first = condition.evaluate(&outputs);
        for _ in 0..3 {
            prop_assert_eq!(condition.evaluate(&outputs), first);
        }
    }

    /// Truthy conditions agree with `is_truthy` on the resolved value
    #[test]
    fn truthy_condition_matches_is_truthy(value in scalar_strategy()) {
        let outputs = outputs_with(value.clone());
        let condition = Condition::parse("scan.result.field").unwrap();
        prop_assert_eq!(condition.evaluate(&outputs), paths::is_truthy(&value));
    }

    /// Conditions print back to an expression that parses to the same condition
    #[test]
    fn condition_display_reparses(op in prop_oneof![Just("=="), Just("!=")], literal in "[xyz][0-9]{0,3}") {
        let condition = Condition::parse(&format!("scan.result.field {} {}", op, literal)).unwrap();
        let reparsed = Condition::parse(&condition.to_string()).unwrap();
        prop_assert_eq!(condition, reparsed);
    }

    /// Templates without placeholders render unchanged
    #[test]
    fn template_without_placeholders_is_identity(text in "[^{}]{0,40}") {
        let outputs = outputs_with(json!(1));
        prop_assert_eq!(paths::render_template(&text, &outputs), text);
    }

    /// A resolvable placeholder is replaced by the scalar text of its value
    #[test]
    fn template_substitutes_resolved_values(value in scalar_strategy()) {
        let outputs = outputs_with(value.clone());
        let rendered = paths::render_template("value={scan.result.field}", &outputs);
        prop_assert_eq!(rendered, format!("value={}", paths::scalar_text(&value)));
    }
}

// =============================================================================
// Utterance Sanitizing
// =============================================================================

use netops::classifier::sanitize;

proptest! {
    /// Sanitized text is bounded and free of control characters
    #[test]
    fn sanitize_bounds_and_strips(input in ".{0,200}", max_len in 1usize..100) {
        let clean = sanitize(&input, max_len);
        prop_assert!(clean.chars().count() <= max_len);
        prop_assert!(!clean.chars().any(|c| matches!(c as u32, 0x00..=0x1f | 0x7f..=0x9f)));
    }

    /// Sanitizing twice changes nothing
    #[test]
    fn sanitize_is_idempotent(input in ".{0,200}", max_len in 1usize..300) {
        let once = sanitize(&input, max_len);
        prop_assert_eq!(sanitize(&once, max_len), once.clone());
    }
}

// =============================================================================
// Run State Persistence
// =============================================================================

use netops::state::{ChangeRecord, RunState, StepResult};
use netops::store::{FileRunStore, RunStateStore};

fn run_state_strategy() -> impl Strategy<Value = RunState> {
    (
        "[a-z][a-z\\-]{0,15}",
        proptest::collection::vec(("[a-z_]{1,10}", step_kind_strategy(), any::<bool>()), 0..6),
        proptest::collection::vec(("[a-z_]{1,12}", "[A-Z]_[0-9]{1,4}", any::<bool>()), 0..4),
        any::<bool>(),
    )
        .prop_map(|(name, steps, changes, finished)| {
            let mut state = RunState::new(name);
            state.start().unwrap();
            for (index, (step, kind, ok)) in steps.into_iter().enumerate() {
                state.enter_step(index).unwrap();
                let started = StepResult::started(step, kind);
                let result = if ok {
                    started.complete(json!({ "result": { "index": index }, "success": true }))
                } else {
                    started.fail("device unreachable")
                };
                state.record_step(result).unwrap();
            }
            for (operation, resource_id, backed_up) in changes {
                let backup_path = backed_up.then(|| format!("/backups/{}.json", operation));
                state
                    .record_change(ChangeRecord {
                        operation,
                        resource_type: "vlan".to_string(),
                        resource_id,
                        backup_path,
                        timestamp: chrono::Utc::now(),
                    })
                    .unwrap();
            }
            if finished {
                state.complete().unwrap();
            }
            state
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever is saved is loaded back unchanged
    #[test]
    fn run_state_file_roundtrip(state in run_state_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        store.save(&state).unwrap();
        prop_assert_eq!(store.load(&state.task_id).unwrap(), state.clone());

        let runs = store.list().unwrap();
        prop_assert_eq!(runs.len(), 1);
        prop_assert_eq!(runs[0].changes, state.change_log.len());
        prop_assert_eq!(runs[0].status, state.status);
    }

    /// Rollback is accepted once from any status except RolledBack
    #[test]
    fn rollback_only_once(mut state in run_state_strategy()) {
        prop_assert!(state.mark_rolled_back().is_ok());
        prop_assert_eq!(state.status, RunStatus::RolledBack);
        prop_assert!(state.mark_rolled_back().is_err());
    }
}

// =============================================================================
// Plan Validation Property Tests
// =============================================================================

use netops::{ParseError, PlanStep};

proptest! {
    /// Reusing a step name anywhere in a plan is rejected
    #[test]
    fn duplicate_step_names_rejected(name in "[a-z]{1,8}", before in 0usize..3, between in 0usize..3) {
        let mut builder = PlanDefinition::builder("p", "network-analyst");
        for i in 0..before {
            builder = builder.step(PlanStep::narrative(format!("{}_pre{}", name, i)));
        }
        builder = builder.step(PlanStep::narrative(name.clone()));
        for i in 0..between {
            builder = builder.step(PlanStep::gate(format!("{}_mid{}", name, i)));
        }
        builder = builder.step(PlanStep::operation(name.clone(), "get_vlans"));

        prop_assert_eq!(builder.build().unwrap_err(), ParseError::DuplicateStep { name });
    }

    /// A reference to a step that only appears later is rejected
    #[test]
    fn forward_reference_rejected(offset in 1usize..4) {
        let mut builder = PlanDefinition::builder("p", "network-analyst")
            .step(PlanStep::operation("first", "get_vlans").with_args_from(format!("s{}.result", offset)));
        for i in 0..=offset {
            builder = builder.step(PlanStep::operation(format!("s{}", i), "get_vlans"));
        }

        let is_forward_ref = matches!(
            builder.build().unwrap_err(),
            ParseError::InvalidReference { ref step, ref reason, .. }
                if step == "first" && reason == "references a later step"
        );
        prop_assert!(is_forward_ref);
    }
}
