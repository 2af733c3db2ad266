//! Step conditions.
//!
//! Grammar (one expression per step, no boolean composition):
//!
//! ```text
//! condition := path "==" literal
//!            | path "!=" literal
//!            | path                  (truthiness)
//! literal   := bare text | 'quoted' | "quoted"
//! ```

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::engine::paths::{self, StepOutputs};

/// Reasons a condition expression is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,

    #[error("composite condition '{expr}' is not supported (use one comparison per step)")]
    Composite { expr: String },

    #[error("invalid path '{path}' in condition")]
    InvalidPath { path: String },
}

/// A parsed step condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Equals { path: String, literal: String },
    NotEquals { path: String, literal: String },
    Truthy { path: String },
}

impl Condition {
    /// Parse a condition expression
    pub fn parse(expr: &str) -> Result<Self, ConditionError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(ConditionError::Empty);
        }

        let composite = expr.contains("&&")
            || expr.contains("||")
            || expr
                .split_whitespace()
                .any(|w| w.eq_ignore_ascii_case("and") || w.eq_ignore_ascii_case("or"));
        if composite {
            return Err(ConditionError::Composite {
                expr: expr.to_string(),
            });
        }

        if let Some((left, right)) = expr.split_once("!=") {
            return Ok(Self::NotEquals {
                path: parse_path(left)?,
                literal: unquote(right),
            });
        }
        if let Some((left, right)) = expr.split_once("==") {
            return Ok(Self::Equals {
                path: parse_path(left)?,
                literal: unquote(right),
            });
        }

        Ok(Self::Truthy {
            path: parse_path(expr)?,
        })
    }

    /// The dot path this condition reads
    pub fn path(&self) -> &str {
        match self {
            Self::Equals { path, .. } | Self::NotEquals { path, .. } | Self::Truthy { path } => {
                path
            }
        }
    }

    /// Evaluate against the outputs of earlier steps.
    ///
    /// A path that does not resolve is never equal to anything, so
    /// `NotEquals` holds and `Equals`/`Truthy` do not.
    pub fn evaluate(&self, outputs: &StepOutputs) -> bool {
        let value = paths::resolve(outputs, self.path());
        match self {
            Self::Equals { literal, .. } => value.is_some_and(|v| matches_literal(v, literal)),
            Self::NotEquals { literal, .. } => !value.is_some_and(|v| matches_literal(v, literal)),
            Self::Truthy { .. } => value.is_some_and(paths::is_truthy),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { path, literal } => write!(f, "{} == {}", path, literal),
            Self::NotEquals { path, literal } => write!(f, "{} != {}", path, literal),
            Self::Truthy { path } => write!(f, "{}", path),
        }
    }
}

fn parse_path(raw: &str) -> Result<String, ConditionError> {
    let path = raw.trim();
    let valid = !path.is_empty()
        && path.split('.').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(path.to_string())
    } else {
        Err(ConditionError::InvalidPath {
            path: path.to_string(),
        })
    }
}

fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    raw.to_string()
}

fn matches_literal(value: &Value, literal: &str) -> bool {
    let text = paths::scalar_text(value);
    text == literal || (value.is_boolean() && text.eq_ignore_ascii_case(literal))
}
