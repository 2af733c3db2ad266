//! Dot-path access into step outputs.
//!
//! Outputs of completed steps are kept in a JSON object keyed by step name.
//! A path such as `discover.result.devices.0.serial` walks that object: the
//! first segment names a step, later segments are object keys or array
//! indices.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

/// Outputs of completed steps, keyed by step name
pub type StepOutputs = Map<String, Value>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\}").expect("placeholder pattern is valid")
});

/// First segment of a dot path (the step name)
pub fn head_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Resolve a dot path. Returns `None` when any segment is missing.
pub fn resolve<'a>(outputs: &'a StepOutputs, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = outputs.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Truthiness: null, false, zero, and empty strings/arrays/objects are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Text form of a value for comparisons and message templates.
///
/// Strings are used verbatim (no quotes); composite values are compact JSON.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Replace `{path}` placeholders with resolved values.
///
/// Placeholders that do not resolve are left untouched so a human reading the
/// message can still see what was meant.
pub fn render_template(template: &str, outputs: &StepOutputs) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match resolve(outputs, &caps[1]) {
            Some(value) => scalar_text(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}
