//! LLM gateway.
//!
//! The single typed entry point to the external model. The gateway shapes
//! requests from templates and parses replies into typed results; business
//! rules (thresholds, scoring, merging) live in the selector and reflector,
//! never here.

mod anthropic;
mod heuristic;

pub use anthropic::AnthropicGateway;
pub use heuristic::heuristic_tag_inference;

use crate::models::{KeyPoint, KeyPointName, Playbook, Turn};
use crate::Result;
use serde::Deserialize;
use std::time::Duration;

/// Request for tag and temperature inference at prompt time.
#[derive(Debug, Clone)]
pub struct TagRequest {
    /// The pending user prompt.
    pub prompt: String,
    /// Recent conversation turns for context (most recent last).
    pub recent_history: Vec<Turn>,
    /// Tags already present in the playbook, to steer reuse.
    pub existing_tags: Vec<String>,
    /// Maximum number of tags to return.
    pub max_tags: usize,
}

/// Result of tag inference.
#[derive(Debug, Clone, PartialEq)]
pub struct TagInference {
    /// Normalized topic tags, most relevant first.
    pub tags: Vec<String>,
    /// Suggested selection temperature in [0, 1].
    pub temperature: f64,
    /// Estimated task complexity in [0, 1].
    pub complexity: f64,
}

/// Request for a reflection pass over a transcript.
#[derive(Debug, Clone)]
pub struct ReflectionRequest {
    /// The conversation to learn from.
    pub turns: Vec<Turn>,
    /// The playbook state the model should evaluate against.
    pub playbook: Playbook,
}

/// How an existing key point performed on a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KptRating {
    /// The lesson demonstrably helped.
    Helpful,
    /// Applicable but made no difference.
    Neutral,
    /// The lesson misled the assistant.
    Harmful,
    /// The lesson did not apply to this conversation.
    NotApplicable,
}

impl KptRating {
    /// The score delta this rating contributes.
    #[must_use]
    pub const fn score_delta(self) -> i64 {
        match self {
            Self::Helpful => 1,
            Self::Neutral | Self::NotApplicable => 0,
            Self::Harmful => -3,
        }
    }
}

/// A per-key-point adjustment proposed by reflection.
#[derive(Debug, Clone, PartialEq)]
pub struct KptDelta {
    /// The key point being adjusted.
    pub name: KeyPointName,
    /// How it performed.
    pub rating: KptRating,
    /// Tags to add (normalized by the reflector).
    pub tag_additions: Vec<String>,
    /// Optional replacement statement.
    pub text_rewrite: Option<String>,
}

/// A candidate key point extracted from a transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateKeyPoint {
    /// The statement, one sentence.
    pub text: String,
    /// Proposed tags (may be empty; the reflector synthesizes them).
    pub tags: Vec<String>,
    /// Expected effectiveness, if the model supplied one.
    pub effect_rating: Option<f64>,
    /// Risk estimate, if the model supplied one.
    pub risk_level: Option<f64>,
    /// Novelty estimate, if the model supplied one.
    pub innovation_level: Option<f64>,
}

/// A merge grouping proposed by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeGroup {
    /// Members of the group, at least two.
    pub members: Vec<KeyPointName>,
    /// LLM-reported semantic similarity in [0, 1].
    pub similarity: f64,
}

/// Everything a single reflection call produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReflectionOutcome {
    /// Candidates to admit as pending.
    pub new_key_points: Vec<CandidateKeyPoint>,
    /// Adjustments to existing key points.
    pub deltas: Vec<KptDelta>,
    /// Proposed merge groups.
    pub merges: Vec<MergeGroup>,
    /// Pending key points to graduate.
    pub promotions: Vec<KeyPointName>,
}

/// Decision for up-converting a legacy statement to when/do form.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationDecision {
    /// The triggering situation.
    pub when: String,
    /// The recommended action.
    pub action: String,
    /// Model confidence in [0, 1]; applied only at 0.7 or above.
    pub confidence: f64,
}

/// Confidence required before a migration decision is applied.
pub const MIGRATION_CONFIDENCE_FLOOR: f64 = 0.7;

/// Typed interface to the external language model.
///
/// Implementations enforce the caller-supplied budget, retry transport
/// errors a bounded number of times, never retry schema errors, and redact
/// secrets from anything they log.
pub trait LlmGateway: Send + Sync {
    /// The gateway name, for logs.
    fn name(&self) -> &'static str;

    /// Infers topic tags and a selection temperature for a prompt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LlmTransport`], [`crate::Error::LlmSchema`],
    /// or [`crate::Error::Timeout`].
    fn infer_tags(&self, request: &TagRequest, budget: Duration) -> Result<TagInference>;

    /// Runs one reflection pass: propose new key points and evaluate every
    /// existing one in a single call.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LlmTransport`], [`crate::Error::LlmSchema`],
    /// or [`crate::Error::Timeout`].
    fn reflect(&self, request: &ReflectionRequest, budget: Duration) -> Result<ReflectionOutcome>;

    /// Proposes a when/do split for a legacy statement.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LlmTransport`], [`crate::Error::LlmSchema`],
    /// or [`crate::Error::Timeout`].
    fn migrate_to_when_do(&self, kpt: &KeyPoint, budget: Duration) -> Result<MigrationDecision>;
}

/// Strips a markdown code fence from a model reply, if present.
///
/// Models occasionally wrap JSON in ```` ```json ```` fences despite
/// instructions; parse the inside rather than failing.
#[must_use]
pub fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();
    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let inner = &trimmed[start + fence.len()..];
            if let Some(end) = inner.find("```") {
                return inner[..end].trim();
            }
            return inner.trim();
        }
    }
    trimmed
}

/// Shortens and redacts a model reply for inclusion in error messages.
#[must_use]
pub fn sanitize_response_for_error(response: &str) -> String {
    const MAX_LEN: usize = 200;
    let redacted = crate::security::redact_secrets(response);
    if redacted.chars().count() > MAX_LEN {
        let truncated: String = redacted.chars().take(MAX_LEN).collect();
        format!("{truncated}...(truncated)")
    } else {
        redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_deltas() {
        assert_eq!(KptRating::Helpful.score_delta(), 1);
        assert_eq!(KptRating::Neutral.score_delta(), 0);
        assert_eq!(KptRating::Harmful.score_delta(), -3);
        assert_eq!(KptRating::NotApplicable.score_delta(), 0);
    }

    #[test]
    fn test_extract_json_plain() {
        assert_eq!(extract_json(r#"{"a": 1}"#), r#"{"a": 1}"#);
        assert_eq!(extract_json("  {\"a\": 1}  "), r#"{"a": 1}"#);
    }

    #[test]
    fn test_extract_json_fenced() {
        let fenced = "```json\n{\"tags\": []}\n```";
        assert_eq!(extract_json(fenced), r#"{"tags": []}"#);

        let bare_fence = "```\n{\"tags\": []}\n```";
        assert_eq!(extract_json(bare_fence), r#"{"tags": []}"#);
    }

    #[test]
    fn test_extract_json_with_prose_around_fence() {
        let reply = "Here you go:\n```json\n{\"ok\": true}\n```\nLet me know!";
        assert_eq!(extract_json(reply), r#"{"ok": true}"#);
    }

    #[test]
    fn test_sanitize_truncates_and_redacts() {
        let long = format!(
            "sk-ant-REDACTED {}",
            "x".repeat(400)
        );
        let sanitized = sanitize_response_for_error(&long);
        assert!(!sanitized.contains("sk-ant-"));
        assert!(sanitized.ends_with("...(truncated)"));
    }
}
