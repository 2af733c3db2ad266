//! Keyword plan matching.
//!
//! Scores every plan against an utterance using its trigger keywords and
//! the verbs present in the utterance. The matcher never selects a Medium or
//! High risk plan for an utterance that only asks to look at something.
//!
//! # Scoring
//!
//! - a phrase trigger (contains a space) matches as a substring
//! - a single-word trigger matches a whole word
//! - `verb_match` is true when a write plan meets an action verb, or a
//!   read plan meets an analysis verb
//! - a plan needs two keyword hits, or one hit plus `verb_match`
//! - score = hits + 0.5 if `verb_match`; ties go to the higher risk tier

use std::collections::HashSet;

use tracing::debug;

use super::PlanDefinition;
use crate::verbs::{tokenize, VerbProfile};

/// Bonus added to the score when the plan's risk tier agrees with the verbs
pub const VERB_MATCH_BONUS: f64 = 0.5;

/// Why a plan matched
#[derive(Debug, Clone, Copy)]
pub struct PlanMatch<'a> {
    pub plan: &'a PlanDefinition,
    pub keyword_hits: usize,
    pub verb_match: bool,
    pub score: f64,
}

/// Lowercased utterance plus the views every plan is scored against
#[derive(Debug)]
struct Utterance {
    lowered: String,
    words: HashSet<String>,
    verbs: VerbProfile,
}

impl Utterance {
    fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        Self {
            lowered: text.to_lowercase(),
            verbs: VerbProfile::from_words(&tokens),
            words: tokens.into_iter().collect(),
        }
    }
}

fn score<'a>(plan: &'a PlanDefinition, utterance: &Utterance) -> Option<PlanMatch<'a>> {
    let keyword_hits = plan
        .triggers
        .iter()
        .filter(|kw| {
            if kw.contains(' ') {
                utterance.lowered.contains(kw.as_str())
            } else {
                utterance.words.contains(kw.as_str())
            }
        })
        .count();

    if keyword_hits == 0 {
        return None;
    }

    let is_write = plan.risk_level.is_write();
    if is_write && utterance.verbs.is_pure_analysis() {
        debug!(
            "Plan '{}' skipped: analysis-only request cannot select a {} risk plan",
            plan.name, plan.risk_level
        );
        return None;
    }

    let verb_match = if is_write {
        utterance.verbs.has_action
    } else {
        utterance.verbs.has_analysis
    };

    if keyword_hits < 2 && !verb_match {
        return None;
    }

    let bonus = if verb_match { VERB_MATCH_BONUS } else { 0.0 };
    Some(PlanMatch {
        plan,
        keyword_hits,
        verb_match,
        score: keyword_hits as f64 + bonus,
    })
}

/// Find the best plan for an utterance, with the evidence for the choice.
///
/// Plans are considered in iteration order; a later plan replaces the
/// current best only with a strictly higher score, or an equal score and a
/// strictly higher risk tier.
pub fn best_match<'a, I>(plans: I, text: &str) -> Option<PlanMatch<'a>>
where
    I: IntoIterator<Item = &'a PlanDefinition>,
{
    let utterance = Utterance::new(text);
    let mut best: Option<PlanMatch<'a>> = None;

    for candidate in plans.into_iter().filter_map(|p| score(p, &utterance)) {
        let better = match &best {
            None => true,
            Some(current) => {
                candidate.score > current.score
                    || (candidate.score == current.score
                        && candidate.plan.risk_level > current.plan.risk_level)
            }
        };
        if better {
            best = Some(candidate);
        }
    }

    if let Some(m) = &best {
        debug!(
            "Plan '{}' matched (hits: {}, verb match: {}, score: {:.1})",
            m.plan.name, m.keyword_hits, m.verb_match, m.score
        );
    }
    best
}

/// Find the best plan for an utterance
pub fn find_best<'a, I>(plans: I, text: &str) -> Option<&'a PlanDefinition>
where
    I: IntoIterator<Item = &'a PlanDefinition>,
{
    best_match(plans, text).map(|m| m.plan)
}
