//! Plan definition loader.
//!
//! Reads markdown files with a YAML header delimited by `---` lines, validates
//! them, and produces `PlanDefinition`s. A directory scan never fails as a
//! whole: broken files are logged and skipped so one typo cannot take every
//! plan offline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Mapping, Value as Yaml};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{validate_steps, Args, Condition, PlanDefinition, PlanHooks, PlanStep, StepAction};
use crate::types::{RiskLevel, StepKind};

static FRONTMATTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^---\s*\n(.*?)\n---\s*\n?(.*)").expect("frontmatter pattern is valid")
});

/// Errors that can occur while loading a plan
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Failed to read {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },

    #[error("File is empty")]
    Empty,

    #[error("No YAML frontmatter found")]
    MissingFrontmatter,

    #[error("Invalid YAML: {reason}")]
    InvalidYaml { reason: String },

    #[error("Frontmatter must be a YAML mapping")]
    NotAMapping,

    #[error("Missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<String> },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Unknown risk_level '{value}' (expected low, medium or high)")]
    UnknownRiskLevel { value: String },

    #[error("Step {index} {reason}")]
    InvalidStep { index: usize, reason: String },

    #[error("Duplicate step name '{name}'")]
    DuplicateStep { name: String },

    #[error("Step '{step}' path '{path}' {reason}")]
    InvalidReference {
        step: String,
        path: String,
        reason: String,
    },

    #[error("Step '{step}' has an invalid condition: {reason}")]
    InvalidCondition { step: String, reason: String },

    #[error("Plan '{name}' is already registered")]
    DuplicatePlan { name: String },
}

/// Outcome of scanning plan directories
#[derive(Debug, Default)]
pub struct LoadReport {
    pub plans: Vec<PlanDefinition>,
    pub failures: Vec<(PathBuf, ParseError)>,
}

/// Parse a plan from its source text
pub fn parse(text: &str) -> Result<PlanDefinition, ParseError> {
    let text = text.trim_start_matches('\u{feff}');
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let caps = FRONTMATTER
        .captures(text)
        .ok_or(ParseError::MissingFrontmatter)?;
    let header = caps.get(1).map_or("", |m| m.as_str());
    let body = caps.get(2).map_or("", |m| m.as_str()).trim();

    let data: Yaml = serde_yaml::from_str(header).map_err(|e| ParseError::InvalidYaml {
        reason: e.to_string(),
    })?;
    let Yaml::Mapping(map) = data else {
        return Err(ParseError::NotAMapping);
    };

    let name = string_field(&map, "name")?;
    let capability = match string_field(&map, "capability")? {
        Some(c) => Some(c),
        None => string_field(&map, "agent")?,
    };

    let mut missing = Vec::new();
    if name.as_deref().is_none_or(|n| n.trim().is_empty()) {
        missing.push("name".to_string());
    }
    if capability.as_deref().is_none_or(|c| c.trim().is_empty()) {
        missing.push("capability".to_string());
    }
    if !missing.is_empty() {
        return Err(ParseError::MissingFields { fields: missing });
    }

    let risk_level = match string_field(&map, "risk_level")? {
        None => RiskLevel::Low,
        Some(raw) => raw
            .trim()
            .to_lowercase()
            .parse::<RiskLevel>()
            .map_err(|_| ParseError::UnknownRiskLevel { value: raw })?,
    };

    let steps = match get(&map, "steps") {
        None | Some(Yaml::Null) => Vec::new(),
        Some(Yaml::Sequence(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| parse_step(index, item))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ParseError::InvalidField {
                field: "steps".to_string(),
                reason: "must be a list".to_string(),
            });
        }
    };
    validate_steps(&steps)?;

    Ok(PlanDefinition {
        name: name.unwrap_or_default().trim().to_string(),
        description: string_field(&map, "description")?.unwrap_or_default(),
        capability: capability.unwrap_or_default().trim().to_string(),
        triggers: parse_triggers(&map)?,
        risk_level,
        steps,
        hooks: parse_hooks(&map)?,
        instructions: body.to_string(),
        origin: None,
    })
}

/// Load and validate a single plan file
pub fn load(path: impl AsRef<Path>) -> Result<PlanDefinition, ParseError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ParseError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let text = fs::read_to_string(path).map_err(|e| ParseError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut plan = parse(&text)?;
    plan.origin = Some(path.to_path_buf());
    Ok(plan)
}

/// Recursively scan directories for `*.md` plan files.
///
/// Files are visited in sorted path order. Invalid files are recorded in
/// the report's `failures` and logged; they never abort the scan.
pub fn scan<P: AsRef<Path>>(dirs: &[P]) -> LoadReport {
    let mut report = LoadReport::default();

    for dir in dirs {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            warn!("Plan directory {:?} does not exist, skipping", dir);
            continue;
        }

        let mut files = Vec::new();
        if let Err(e) = collect_markdown(dir, &mut files) {
            warn!("Failed to scan plan directory {:?}: {}", dir, e);
        }
        files.sort();

        for path in files {
            match load(&path) {
                Ok(plan) => {
                    debug!("Loaded plan '{}' from {:?}", plan.name, path);
                    report.plans.push(plan);
                }
                Err(e) => {
                    warn!("Skipping invalid plan file {:?}: {}", path, e);
                    report.failures.push((path, e));
                }
            }
        }
    }

    info!(
        "Loaded {} plan(s), skipped {} invalid file(s)",
        report.plans.len(),
        report.failures.len()
    );
    report
}

/// Load every valid plan under the given directories
pub fn load_all<P: AsRef<Path>>(dirs: &[P]) -> Vec<PlanDefinition> {
    scan(dirs).plans
}

fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_markdown(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "md") {
            out.push(path);
        }
    }
    Ok(())
}

fn get<'a>(map: &'a Mapping, key: &str) -> Option<&'a Yaml> {
    map.get(key)
}

fn string_field(map: &Mapping, key: &str) -> Result<Option<String>, ParseError> {
    match get(map, key) {
        None | Some(Yaml::Null) => Ok(None),
        Some(Yaml::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ParseError::InvalidField {
            field: key.to_string(),
            reason: "must be a string".to_string(),
        }),
    }
}

fn parse_triggers(map: &Mapping) -> Result<Vec<String>, ParseError> {
    // `triggers` is accepted as a shorter alias
    let (field, value) = match get(map, "trigger_keywords") {
        Some(value) => ("trigger_keywords", value),
        None => match get(map, "triggers") {
            Some(value) => ("triggers", value),
            None => return Ok(Vec::new()),
        },
    };
    let invalid = || ParseError::InvalidField {
        field: field.to_string(),
        reason: "must be a list of strings".to_string(),
    };

    match value {
        Yaml::Null => Ok(Vec::new()),
        Yaml::Sequence(items) => {
            let mut triggers = Vec::with_capacity(items.len());
            for item in items {
                let Yaml::String(s) = item else {
                    return Err(invalid());
                };
                let keyword = s.trim().to_lowercase();
                if !keyword.is_empty() {
                    triggers.push(keyword);
                }
            }
            Ok(triggers)
        }
        _ => Err(invalid()),
    }
}

fn parse_hooks(map: &Mapping) -> Result<PlanHooks, ParseError> {
    let invalid = |reason: &str| ParseError::InvalidField {
        field: "hooks".to_string(),
        reason: reason.to_string(),
    };

    let hooks = match get(map, "hooks") {
        None | Some(Yaml::Null) => return Ok(PlanHooks::default()),
        Some(Yaml::Mapping(hooks)) => hooks,
        Some(_) => return Err(invalid("must be a mapping")),
    };

    let mut result = PlanHooks::default();
    for (key, value) in hooks {
        let name = match value {
            Yaml::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Yaml::Null => continue,
            _ => return Err(invalid("hook names must be strings")),
        };
        match key.as_str() {
            Some("pre") => result.pre = Some(name),
            Some("post") => result.post = Some(name),
            _ => return Err(invalid("only 'pre' and 'post' are allowed")),
        }
    }
    Ok(result)
}

fn parse_step(index: usize, item: &Yaml) -> Result<PlanStep, ParseError> {
    let step_err = |reason: String| ParseError::InvalidStep { index, reason };

    let Yaml::Mapping(map) = item else {
        return Err(step_err("must be a mapping".to_string()));
    };
    let field = |key: &str| {
        string_field(map, key).map_err(|_| step_err(format!("field '{}' must be a string", key)))
    };

    let name = match field("name")? {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => return Err(step_err("missing 'name' field".to_string())),
    };
    let kind_raw = field("type")?
        .ok_or_else(|| step_err(format!("('{}') missing 'type' field", name)))?;
    let kind: StepKind = kind_raw
        .trim()
        .to_lowercase()
        .parse()
        .map_err(|_| step_err(format!("('{}') has invalid type '{}'", name, kind_raw)))?;

    let condition = field("condition")?
        .map(|expr| Condition::parse(&expr))
        .transpose()
        .map_err(|e| ParseError::InvalidCondition {
            step: name.clone(),
            reason: e.to_string(),
        })?;

    let action = match kind {
        StepKind::Operation => {
            let operation = match field("tool")? {
                Some(op) if !op.trim().is_empty() => op.trim().to_string(),
                _ => return Err(step_err(format!("('{}') has no tool specified", name))),
            };
            let args = match get(map, "args") {
                None | Some(Yaml::Null) => Args::new(),
                Some(value @ Yaml::Mapping(_)) => match serde_json::to_value(value) {
                    Ok(serde_json::Value::Object(args)) => args,
                    _ => return Err(step_err(format!("('{}') args must use string keys", name))),
                },
                Some(_) => return Err(step_err(format!("('{}') args must be a mapping", name))),
            };
            StepAction::Operation {
                operation,
                args,
                args_from: field("args_from")?.map(|p| p.trim().to_string()),
            }
        }
        StepKind::Narrative => StepAction::Narrative,
        StepKind::Gate => StepAction::Gate {
            message_template: field("message_template")?,
        },
    };

    Ok(PlanStep {
        name,
        description: field("description")?.unwrap_or_default(),
        condition,
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"---
name: network-health
description: Full health review
agent: network-analyst
risk_level: low
trigger_keywords: [Health, "network health", diagnose]
hooks:
  pre: snapshot_inventory
steps:
  - name: discover
    type: tool
    tool: full_discovery
    args:
      org_id: "123"
      depth: 2
  - name: analyze
    type: agent
    description: Summarize the findings
  - name: confirm
    type: gate
    condition: discover.result.issues
    message_template: "Open tickets for {discover.result.issues}?"
---

# Instructions

Review the devices.
"#;

    #[test]
    fn test_parse_full_plan() {
        let plan = parse(SAMPLE).unwrap();
        assert_eq!(plan.name, "network-health");
        assert_eq!(plan.capability, "network-analyst");
        assert_eq!(plan.risk_level, RiskLevel::Low);
        assert_eq!(plan.triggers, vec!["health", "network health", "diagnose"]);
        assert_eq!(plan.hooks.pre.as_deref(), Some("snapshot_inventory"));
        assert_eq!(plan.steps.len(), 3);
        assert!(plan.instructions.starts_with("# Instructions"));

        match &plan.steps[0].action {
            StepAction::Operation { operation, args, .. } => {
                assert_eq!(operation, "full_discovery");
                assert_eq!(args["org_id"], "123");
                assert_eq!(args["depth"], 2);
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(plan.steps[1].kind(), StepKind::Narrative);
        assert!(plan.steps[2].condition.is_some());
    }

    #[test]
    fn test_parse_error_messages() {
        assert_eq!(parse("  \n").unwrap_err(), ParseError::Empty);
        assert_eq!(
            parse("just markdown").unwrap_err(),
            ParseError::MissingFrontmatter
        );
        assert_eq!(
            parse("---\n- a\n- b\n---\nbody").unwrap_err(),
            ParseError::NotAMapping
        );
        assert!(matches!(
            parse("---\nname: [unclosed\n---\n").unwrap_err(),
            ParseError::InvalidYaml { .. }
        ));
        assert_eq!(
            parse("---\ndescription: x\n---\n").unwrap_err().to_string(),
            "Missing required fields: name, capability"
        );
    }

    #[test]
    fn test_parse_rejects_unknown_risk_level() {
        let err = parse("---\nname: p\ncapability: c\nrisk_level: extreme\n---\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownRiskLevel {
                value: "extreme".to_string()
            }
        );
        let plan = parse("---\nname: p\ncapability: c\nrisk_level: HIGH\n---\n").unwrap();
        assert_eq!(plan.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_parse_step_errors() {
        let err = parse("---\nname: p\ncapability: c\nsteps:\n  - just a string\n---\n").unwrap_err();
        assert_eq!(err.to_string(), "Step 0 must be a mapping");

        let err = parse("---\nname: p\ncapability: c\nsteps:\n  - type: tool\n---\n").unwrap_err();
        assert_eq!(err.to_string(), "Step 0 missing 'name' field");

        let err = parse("---\nname: p\ncapability: c\nsteps:\n  - name: a\n---\n").unwrap_err();
        assert!(err.to_string().contains("missing 'type' field"));

        let err =
            parse("---\nname: p\ncapability: c\nsteps:\n  - name: a\n    type: shell\n---\n")
                .unwrap_err();
        assert!(err.to_string().contains("invalid type 'shell'"));

        let err =
            parse("---\nname: p\ncapability: c\nsteps:\n  - name: a\n    type: tool\n---\n")
                .unwrap_err();
        assert!(err.to_string().contains("no tool specified"));
    }

    #[test]
    fn test_parse_trigger_keywords() {
        let plan =
            parse("---\nname: p\ncapability: c\ntrigger_keywords: [VLAN, \" switch port \"]\n---\n")
                .unwrap();
        assert_eq!(plan.triggers, vec!["vlan", "switch port"]);

        let plan = parse("---\nname: p\ncapability: c\ntriggers: [vlan]\n---\n").unwrap();
        assert_eq!(plan.triggers, vec!["vlan"]);

        let plan = parse(
            "---\nname: p\ncapability: c\ntrigger_keywords: [ssid]\ntriggers: [vlan]\n---\n",
        )
        .unwrap();
        assert_eq!(plan.triggers, vec!["ssid"]);

        let err = parse("---\nname: p\ncapability: c\ntrigger_keywords: vlan\n---\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidField {
                field: "trigger_keywords".to_string(),
                reason: "must be a list of strings".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_composite_condition() {
        let text = "---\nname: p\ncapability: c\nsteps:\n  - name: a\n    type: agent\n  - name: b\n    type: agent\n    condition: a.text and a.other\n---\n";
        assert!(matches!(
            parse(text).unwrap_err(),
            ParseError::InvalidCondition { .. }
        ));
    }

    #[test]
    fn test_parse_rejects_bad_hooks() {
        let text = "---\nname: p\ncapability: c\nhooks:\n  during: x\n---\n";
        assert!(matches!(
            parse(text).unwrap_err(),
            ParseError::InvalidField { ref field, .. } if field == "hooks"
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load("/nonexistent/plan.md").unwrap_err();
        assert!(matches!(err, ParseError::FileNotFound { .. }));
    }

    #[test]
    fn test_scan_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(dir.path().join("a.md"), SAMPLE).unwrap();
        fs::write(nested.join("b.md"), "no header").unwrap();
        fs::write(dir.path().join("notes.txt"), SAMPLE).unwrap();

        let report = scan(&[dir.path()]);
        assert_eq!(report.plans.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].1, ParseError::MissingFrontmatter);
        assert_eq!(
            report.plans[0].origin.as_deref(),
            Some(dir.path().join("a.md").as_path())
        );
    }
}
