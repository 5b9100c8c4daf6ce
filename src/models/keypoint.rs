//! Key point types and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default effect rating for key points that arrive without one.
pub const DEFAULT_EFFECT_RATING: f64 = 0.5;
/// Default risk level for key points that arrive without one.
pub const DEFAULT_RISK_LEVEL: f64 = -0.3;
/// Default innovation level for key points that arrive without one.
pub const DEFAULT_INNOVATION_LEVEL: f64 = 0.5;

/// Identifier of a key point, `kpt_NNN` with a zero-padded 3-digit index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPointName(String);

impl KeyPointName {
    /// Prefix shared by all key point names.
    pub const PREFIX: &'static str = "kpt_";

    /// Creates a name from a 1-based index: `from_index(7)` is `kpt_007`.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(format!("{}{index:03}", Self::PREFIX))
    }

    /// Wraps a raw name string without validation.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the numeric index out of the name, if it has the
    /// `kpt_NNN` form.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.0
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.parse::<usize>().ok())
    }
}

impl fmt::Display for KeyPointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for KeyPointName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The statement carried by a key point.
///
/// Two shapes are accepted on read: a single free-form `text` (legacy) or a
/// structured `when`/`do` pair. They are mutually convertible; the
/// structured form renders as "When X, do Y".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPointBody {
    /// Legacy single-text statement.
    Legacy {
        /// The statement.
        text: String,
    },
    /// Structured condition/action pair.
    Structured {
        /// The triggering situation.
        when: String,
        /// The recommended action.
        action: String,
    },
}

impl KeyPointBody {
    /// Creates a legacy body.
    #[must_use]
    pub fn legacy(text: impl Into<String>) -> Self {
        Self::Legacy { text: text.into() }
    }

    /// Creates a structured body.
    #[must_use]
    pub fn structured(when: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Structured {
            when: when.into(),
            action: action.into(),
        }
    }

    /// Renders the statement as a single line of prose.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Legacy { text } => text.clone(),
            Self::Structured { when, action } => format!("When {when}, do {action}"),
        }
    }

    /// Returns true when the body carries no usable statement.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Legacy { text } => text.trim().is_empty(),
            Self::Structured { when, action } => {
                when.trim().is_empty() || action.trim().is_empty()
            },
        }
    }
}

/// A single durable lesson in the playbook.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPoint {
    /// Unique identifier, dense `kpt_001..kpt_N` at rest.
    pub name: KeyPointName,
    /// The statement.
    pub body: KeyPointBody,
    /// Normalized, deduplicated tags. Never empty at rest.
    pub tags: Vec<String>,
    /// Accumulated usefulness score. Practical range [-5, +20].
    pub score: i64,
    /// Expected effectiveness when applied, in [0, 1].
    pub effect_rating: f64,
    /// Signed risk score in [-1, 0] at rest; more negative is safer.
    /// Raw values above 0 may be observed before the first write.
    pub risk_level: f64,
    /// How novel or exploratory the item is, in [0, 1].
    pub innovation_level: f64,
    /// Pending items are excluded from injection until corroborated.
    pub pending: bool,
}

impl KeyPoint {
    /// Creates a stable key point with default dimensional attributes.
    #[must_use]
    pub fn new(name: KeyPointName, body: KeyPointBody) -> Self {
        Self {
            name,
            body,
            tags: Vec::new(),
            score: 0,
            effect_rating: DEFAULT_EFFECT_RATING,
            risk_level: DEFAULT_RISK_LEVEL,
            innovation_level: DEFAULT_INNOVATION_LEVEL,
            pending: false,
        }
    }

    /// Renders the statement as prose.
    #[must_use]
    pub fn text(&self) -> String {
        self.body.render()
    }

    /// The tag used for diversity bookkeeping during selection.
    #[must_use]
    pub fn primary_tag(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }

    /// Clamps dimensional attributes to their declared ranges.
    ///
    /// `score` is intentionally left unclamped; its bounds are enforced by
    /// pruning, not truncation.
    pub fn clamp_ranges(&mut self) {
        self.effect_rating = self.effect_rating.clamp(0.0, 1.0);
        self.risk_level = self.risk_level.clamp(-1.0, 0.0);
        self.innovation_level = self.innovation_level.clamp(0.0, 1.0);
    }
}
