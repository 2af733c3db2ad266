//! Verb vocabularies used to tell "look at" requests from "change" requests.
//!
//! Both the plan matcher and the intent classifier consult this module. An
//! utterance that only contains analysis verbs must never be routed to a plan
//! or capability that mutates device state.

/// Verbs that indicate the user wants something changed
pub const ACTION_VERBS: &[&str] = &[
    "configure", "create", "change", "set", "add", "remove", "delete", "enable", "disable",
    "update", "apply", "modify", "assign", "block", "unblock", "allow", "deny", "revert",
    "restore", "rollback", "undo",
];

/// Verbs that indicate the user wants something inspected or explained
pub const ANALYSIS_VERBS: &[&str] = &[
    "analyze", "analysis", "check", "verify", "show", "list", "why", "what", "how", "status",
    "health", "scan", "inspect", "review", "report", "discover", "discovery", "diagnose",
    "compare", "find", "display", "describe", "audit", "investigate",
];

/// Split text into lowercase words.
///
/// Word characters are alphanumerics plus `-` and `_`, so `"vlan-100?"`
/// yields `["vlan-100"]` and punctuation never glues onto a keyword.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Which verb families appear in an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerbProfile {
    pub has_action: bool,
    pub has_analysis: bool,
}

impl VerbProfile {
    /// Classify the verbs present in `text`
    pub fn detect(text: &str) -> Self {
        let words = tokenize(text);
        Self::from_words(&words)
    }

    /// Classify an already tokenized utterance
    pub fn from_words(words: &[String]) -> Self {
        Self {
            has_action: words.iter().any(|w| ACTION_VERBS.contains(&w.as_str())),
            has_analysis: words.iter().any(|w| ANALYSIS_VERBS.contains(&w.as_str())),
        }
    }

    /// Analysis verbs present and no action verb
    #[inline]
    pub fn is_pure_analysis(self) -> bool {
        self.has_analysis && !self.has_action
    }

    /// Action verbs present and no analysis verb
    #[inline]
    pub fn is_pure_action(self) -> bool {
        self.has_action && !self.has_analysis
    }
}
