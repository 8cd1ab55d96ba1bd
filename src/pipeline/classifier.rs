//! Slot-availability classifier.
//!
//! Decides whether a message from the source group announces an open
//! appointment slot. Evaluation order:
//! - silent or empty messages → Suppress, no pattern evaluation
//! - "unavailable" phrases (whole words) → Suppress
//! - "available" phrases (substrings) → Forward
//! - nothing matched → Suppress
//!
//! Unavailable patterns always win over available ones, so "not available"
//! never forwards even though it contains "available".

use std::sync::LazyLock;

use regex::Regex;

use crate::pipeline::types::Outcome;

/// Phrases meaning "nothing open". Matched as whole words.
const UNAVAILABLE_PATTERNS: &[&str] = &[
    r"\bno slots available\b",
    r"\bno slots\b",
    r"\bna all\b",
    r"\bna\b",
    r"\bn\.a\.",
    r"\bn/a\b",
    r"\bnot available\b",
];

/// Phrases meaning "something opened up". Matched anywhere in the text.
const AVAILABLE_PATTERNS: &[&str] = &[
    r"available",
    r"slots open",
    r"slots still available",
    r"slots are available",
    r"just booked",
    r"saw",
    r"open",
    r"remaining",
    r"available for",
    r"available in",
    r"available on",
    r"available now",
    r"yes",
    // Dates are posted as "12 jan", "07jan", "mar 3rd".
    r"jan",
    r"feb",
    r"mar",
    r"apr",
    r"may",
    r"jun",
    r"jul",
    r"aug",
    r"sep",
    r"oct",
    r"nov",
    r"dec",
];

static DEFAULT_CLASSIFIER: LazyLock<Classifier> = LazyLock::new(Classifier::default_patterns);

/// Why a message got its outcome. Only used for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// Sent without notification in the source group.
    Silent,
    /// No text body (media without caption, service message).
    Empty,
    /// Matched an unavailable phrase.
    Unavailable(String),
    /// Matched an available phrase.
    Available(String),
    /// Matched nothing.
    NoSignal,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Silent => write!(f, "silent message"),
            Self::Empty => write!(f, "empty message"),
            Self::Unavailable(p) => write!(f, "unavailable pattern {p:?}"),
            Self::Available(p) => write!(f, "available pattern {p:?}"),
            Self::NoSignal => write!(f, "no availability signal"),
        }
    }
}

/// Outcome plus the reason it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Outcome,
    pub reason: Reason,
}

impl Decision {
    fn forward(reason: Reason) -> Self {
        Self {
            outcome: Outcome::Forward,
            reason,
        }
    }

    fn suppress(reason: Reason) -> Self {
        Self {
            outcome: Outcome::Suppress,
            reason,
        }
    }
}

/// Ordered pattern lists with their compiled regexes.
#[derive(Debug, Clone)]
pub struct Classifier {
    unavailable: Vec<(String, Regex)>,
    available: Vec<(String, Regex)>,
}

impl Classifier {
    /// Build a classifier from custom pattern lists, in evaluation order.
    pub fn new(unavailable: &[&str], available: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            unavailable: compile_all(unavailable)?,
            available: compile_all(available)?,
        })
    }

    /// The built-in slot-availability patterns.
    pub fn default_patterns() -> Self {
        Self::new(UNAVAILABLE_PATTERNS, AVAILABLE_PATTERNS)
            .expect("built-in classifier patterns are valid regexes")
    }

    /// Classify a message, returning only the outcome.
    pub fn classify(&self, text: &str, silent: bool) -> Outcome {
        self.evaluate(text, silent).outcome
    }

    /// Classify a message and report which rule decided it.
    pub fn evaluate(&self, text: &str, silent: bool) -> Decision {
        if silent {
            return Decision::suppress(Reason::Silent);
        }
        if text.is_empty() {
            return Decision::suppress(Reason::Empty);
        }

        let lower = text.to_lowercase();

        if let Some((pattern, _)) = self.unavailable.iter().find(|(_, re)| re.is_match(&lower)) {
            return Decision::suppress(Reason::Unavailable(pattern.clone()));
        }

        if let Some((pattern, _)) = self.available.iter().find(|(_, re)| re.is_match(&lower)) {
            return Decision::forward(Reason::Available(pattern.clone()));
        }

        Decision::suppress(Reason::NoSignal)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

/// Classify with the built-in patterns.
pub fn classify(text: &str, silent: bool) -> Outcome {
    DEFAULT_CLASSIFIER.classify(text, silent)
}

fn compile_all(patterns: &[&str]) -> Result<Vec<(String, Regex)>, regex::Error> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map(|re| ((*p).to_string(), re)))
        .collect()
}
