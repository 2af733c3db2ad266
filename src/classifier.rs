//! Intent Classifier
//!
//! Routes a natural-language request to a capability, and optionally to a
//! concrete plan. Classification is layered, cheapest first:
//!
//! 1. **Explicit prefix**: `@config ...` names the capability outright
//! 2. **Deterministic scoring**: weighted regex patterns per capability,
//!    nudged by the verb family of the request
//! 3. **Plan matching**: a matching plan wins with full confidence
//! 4. **Model fallback**: only when nothing above is confident
//!
//! Ambiguity is never an error. A weak result comes back with
//! `requires_confirmation` set so the caller can ask before acting.

use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::plan::{PlanCatalog, PlanDefinition};
use crate::registry::CapabilityInfo;
use crate::verbs::VerbProfile;

/// Deterministic results at or above this confidence skip the model
pub const QUICK_ACCEPT_CONFIDENCE: f64 = 0.9;
/// Results below this confidence ask the user to confirm
pub const CONFIRMATION_THRESHOLD: f64 = 0.7;
/// Confidence used when nothing matched at all
pub const FALLBACK_CONFIDENCE: f64 = 0.3;
/// Penalty applied to the deterministic result when the model fails
pub const MODEL_FAILURE_PENALTY: f64 = 0.8;
/// Default bound on utterance length (characters)
pub const DEFAULT_MAX_UTTERANCE_LEN: usize = 500;
/// Capability used when every other signal is missing
pub const DEFAULT_CAPABILITY: &str = "network-analyst";

const SCORE_FLOOR: f64 = 0.6;
const SCORE_STEP: f64 = 0.1;
const SCORE_CEILING: f64 = 0.95;
const VERB_BOOST: f64 = 2.0;
const VERB_PENALTY: f64 = 1.0;

/// Errors raised while configuring the classifier or by the model fallback
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Model classifier unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model chose unknown capability '{capability}'")]
    UnknownCapability { capability: String },
}

/// Which verb family a capability is biased towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VerbAffinity {
    /// Read-only investigation
    Analysis,
    /// Changes to device state
    Action,
    /// Not biased either way
    Neutral,
}

/// Routing rules for one capability
#[derive(Debug, Clone)]
pub struct CapabilityProfile {
    pub name: String,
    pub description: String,
    /// Lowercase markers such as `@config`
    pub prefixes: Vec<String>,
    pub patterns: Vec<Regex>,
    /// Multiplier applied to every pattern hit
    pub weight: f64,
    pub affinity: VerbAffinity,
}

impl CapabilityProfile {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prefixes: Vec::new(),
            patterns: Vec::new(),
            weight: 1.0,
            affinity: VerbAffinity::Neutral,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into().to_lowercase());
        self
    }

    /// Add a case-insensitive pattern
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, ClassifierError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ClassifierError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        self.patterns.push(regex);
        Ok(self)
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_affinity(mut self, affinity: VerbAffinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Weighted count of pattern hits in `text`
    pub fn score(&self, text: &str) -> f64 {
        let hits: usize = self
            .patterns
            .iter()
            .map(|p| p.find_iter(text).count())
            .sum();
        hits as f64 * self.weight
    }

    pub fn info(&self) -> CapabilityInfo {
        CapabilityInfo::new(&self.name, &self.description)
    }

    fn builtin(mut self, pattern: &str) -> Self {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("builtin classifier pattern is valid");
        self.patterns.push(regex);
        self
    }
}

/// The three stock capabilities of a network operations assistant
pub fn default_profiles() -> Vec<CapabilityProfile> {
    vec![
        CapabilityProfile::new(
            "network-analyst",
            "Discovers devices, diagnoses issues and reports on network health",
        )
        .with_prefix("@analyst")
        .with_prefix("@network")
        .with_affinity(VerbAffinity::Analysis)
        .builtin(r"\b(discover|scan|analyz\w*|diagnos\w*|health|status|offline|inventory|check|inspect|audit)\b")
        .builtin(r"\b(network|device|issue|problem|find|show|list|give|what|how many|do we have)\b"),
        CapabilityProfile::new(
            "config-specialist",
            "Changes SSIDs, VLANs, firewall rules, switch ports and other configuration",
        )
        .with_prefix("@specialist")
        .with_prefix("@config")
        .with_weight(1.2)
        .with_affinity(VerbAffinity::Action)
        .builtin(r"\b(config\w*|ssid|vlan|firewall|acl|switch|port|camera|block|allow|deny|secure)\b")
        .builtin(r"\b(create|add|update|modify|delete|remove|enable|disable|set|change|apply)\b"),
        CapabilityProfile::new(
            "workflow-creator",
            "Builds automation workflows, alerts and scheduled remediation",
        )
        .with_prefix("@workflow")
        .with_prefix("@automat")
        .with_weight(1.5)
        .builtin(r"\b(workflow|automat\w*|schedule|alert|notif\w*|trigger|template|remediat\w*|handler|compliance)\b"),
    ]
}

/// Structured answer from a model classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVerdict {
    pub capability: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Non-deterministic fallback, typically backed by a language model with a
/// structured output schema
#[async_trait]
pub trait ModelClassifier: Send + Sync {
    async fn classify(
        &self,
        utterance: &str,
        capabilities: &[CapabilityInfo],
    ) -> Result<ModelVerdict, ClassifierError>;
}

/// Outcome of classifying one utterance
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub capability: String,
    pub confidence: f64,
    pub reasoning: String,
    pub requires_confirmation: bool,
    /// Name of the matched plan, if any
    pub matched_plan: Option<String>,
    #[serde(skip)]
    pub plan: Option<Arc<PlanDefinition>>,
}

impl ClassificationResult {
    fn new(capability: impl Into<String>, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            confidence,
            reasoning: reasoning.into(),
            requires_confirmation: confidence < CONFIRMATION_THRESHOLD,
            matched_plan: None,
            plan: None,
        }
    }

    fn for_plan(plan: Arc<PlanDefinition>) -> Self {
        Self {
            capability: plan.capability.clone(),
            confidence: 1.0,
            reasoning: format!("Matched plan '{}'", plan.name),
            requires_confirmation: false,
            matched_plan: Some(plan.name.clone()),
            plan: Some(plan),
        }
    }

    fn fallback(capability: &str, reasoning: &str) -> Self {
        let mut result = Self::new(capability, FALLBACK_CONFIDENCE, reasoning);
        result.requires_confirmation = true;
        result
    }
}

/// Truncate to `max_len` characters and strip control characters
pub fn sanitize(utterance: &str, max_len: usize) -> String {
    utterance
        .chars()
        .take(max_len)
        .filter(|c| !matches!(*c as u32, 0x00..=0x1f | 0x7f..=0x9f))
        .collect()
}

/// Layered classifier; see the module docs for the order of evaluation
#[derive(Clone)]
pub struct IntentClassifier {
    profiles: Vec<CapabilityProfile>,
    catalog: Option<Arc<PlanCatalog>>,
    model: Option<Arc<dyn ModelClassifier>>,
    max_utterance_len: usize,
    default_capability: String,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    /// Classifier with the default capability profiles, no plans and no model
    pub fn new() -> Self {
        Self::with_profiles(default_profiles())
    }

    pub fn with_profiles(profiles: Vec<CapabilityProfile>) -> Self {
        Self {
            profiles,
            catalog: None,
            model: None,
            max_utterance_len: DEFAULT_MAX_UTTERANCE_LEN,
            default_capability: DEFAULT_CAPABILITY.to_string(),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<PlanCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ModelClassifier>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_max_utterance_len(mut self, len: usize) -> Self {
        self.max_utterance_len = len;
        self
    }

    pub fn with_default_capability(mut self, capability: impl Into<String>) -> Self {
        self.default_capability = capability.into();
        self
    }

    pub fn profiles(&self) -> &[CapabilityProfile] {
        &self.profiles
    }

    /// Classify an utterance. Never fails; weak answers set
    /// `requires_confirmation`.
    pub async fn classify(&self, utterance: &str, use_plan_matching: bool) -> ClassificationResult {
        let text = sanitize(utterance, self.max_utterance_len);

        if let Some(result) = self.match_prefix(&text) {
            info!("Classified by prefix as {}", result.capability);
            return result;
        }

        let quick = self.score(&text);

        if use_plan_matching {
            if let Some(plan) = self.catalog.as_ref().and_then(|c| c.find_best(&text)) {
                info!("Classified by plan '{}' as {}", plan.name, plan.capability);
                return ClassificationResult::for_plan(plan);
            }
        }

        if let Some(result) = &quick {
            if result.confidence >= QUICK_ACCEPT_CONFIDENCE {
                info!(
                    "Classified by patterns as {} ({:.2})",
                    result.capability, result.confidence
                );
                return result.clone();
            }
        }

        let Some(model) = &self.model else {
            return quick.unwrap_or_else(|| {
                ClassificationResult::fallback(&self.default_capability, "Default fallback")
            });
        };

        match self.ask_model(model.as_ref(), &text).await {
            Ok(result) => {
                info!(
                    "Classified by model as {} ({:.2})",
                    result.capability, result.confidence
                );
                result
            }
            Err(e) => {
                warn!("Model classification failed: {}", e);
                self.degrade(quick)
            }
        }
    }

    /// Prefix and pattern layers only
    pub fn classify_quick(&self, utterance: &str) -> Option<ClassificationResult> {
        let text = sanitize(utterance, self.max_utterance_len);
        self.match_prefix(&text).or_else(|| self.score(&text))
    }

    fn match_prefix(&self, text: &str) -> Option<ClassificationResult> {
        let lowered = text.trim_start().to_lowercase();
        self.profiles.iter().find_map(|profile| {
            profile
                .prefixes
                .iter()
                .find(|p| lowered.starts_with(p.as_str()))
                .map(|p| {
                    ClassificationResult::new(
                        &profile.name,
                        1.0,
                        format!("Explicit prefix '{}'", p),
                    )
                })
        })
    }

    fn score(&self, text: &str) -> Option<ClassificationResult> {
        let mut scores: Vec<f64> = self.profiles.iter().map(|p| p.score(text)).collect();

        let verbs = VerbProfile::detect(text);
        let neutral_scored = self
            .profiles
            .iter()
            .zip(&scores)
            .any(|(p, s)| p.affinity == VerbAffinity::Neutral && *s > 0.0);

        let boosted = !neutral_scored && (verbs.is_pure_action() || verbs.is_pure_analysis());
        if boosted {
            let (favoured, penalised) = if verbs.is_pure_action() {
                (VerbAffinity::Action, VerbAffinity::Analysis)
            } else {
                (VerbAffinity::Analysis, VerbAffinity::Action)
            };
            for (profile, score) in self.profiles.iter().zip(scores.iter_mut()) {
                if profile.affinity == favoured {
                    *score += VERB_BOOST;
                } else if profile.affinity == penalised {
                    *score = (*score - VERB_PENALTY).max(0.0);
                }
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for (index, score) in scores.iter().enumerate() {
            if *score > 0.0 && best.is_none_or(|(_, top)| *score > top) {
                best = Some((index, *score));
            }
        }
        let (index, score) = best?;

        let confidence = (SCORE_FLOOR + SCORE_STEP * score).min(SCORE_CEILING);
        let mut reasoning = format!("Pattern match (score: {:.1})", score);
        if boosted {
            reasoning.push_str(", verb-aware boost applied");
        }
        debug!("Pattern scores: {:?}", scores);
        Some(ClassificationResult::new(
            &self.profiles[index].name,
            confidence,
            reasoning,
        ))
    }

    async fn ask_model(
        &self,
        model: &dyn ModelClassifier,
        text: &str,
    ) -> Result<ClassificationResult, ClassifierError> {
        let capabilities: Vec<CapabilityInfo> = self.profiles.iter().map(|p| p.info()).collect();
        let verdict = model.classify(text, &capabilities).await?;

        if !self.profiles.iter().any(|p| p.name == verdict.capability) {
            return Err(ClassifierError::UnknownCapability {
                capability: verdict.capability,
            });
        }

        let confidence = if verdict.confidence.is_nan() {
            0.0
        } else {
            verdict.confidence.clamp(0.0, 1.0)
        };
        Ok(ClassificationResult::new(
            verdict.capability,
            confidence,
            verdict.reasoning,
        ))
    }

    fn degrade(&self, quick: Option<ClassificationResult>) -> ClassificationResult {
        match quick {
            Some(mut result) => {
                result.confidence *= MODEL_FAILURE_PENALTY;
                result.reasoning.push_str(" (model unavailable)");
                result.requires_confirmation = result.confidence < CONFIRMATION_THRESHOLD;
                result
            }
            None => ClassificationResult::fallback(
                &self.default_capability,
                "Model classification failed, using default",
            ),
        }
    }
}
