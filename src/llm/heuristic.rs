//! Deterministic local fallback for tag inference.
//!
//! Used when no LLM is configured or the call fails: tags come from
//! stop-word-filtered prompt tokens ranked by frequency, the temperature is
//! the configured default, and complexity is a crude length estimate.

use super::TagInference;
use crate::tags;
use std::collections::HashMap;

/// Prompt length (in significant tokens) treated as maximal complexity.
const COMPLEXITY_SATURATION: usize = 80;

/// Infers tags and temperature without a model.
#[must_use]
pub fn heuristic_tag_inference(
    prompt: &str,
    max_tags: usize,
    default_temperature: f64,
) -> TagInference {
    let tokens = tags::significant_tokens(prompt);

    // Rank by frequency, breaking ties by first appearance.
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in tags::tokenize_for_counting(prompt) {
        if let Some(entry) = tokens.iter().find(|t| **t == token) {
            *counts.entry(entry.as_str()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<&String> = tokens.iter().collect();
    ranked.sort_by(|a, b| {
        counts
            .get(b.as_str())
            .unwrap_or(&0)
            .cmp(counts.get(a.as_str()).unwrap_or(&0))
            .then_with(|| {
                let pos_a = tokens.iter().position(|t| t == *a).unwrap_or(usize::MAX);
                let pos_b = tokens.iter().position(|t| t == *b).unwrap_or(usize::MAX);
                pos_a.cmp(&pos_b)
            })
    });

    let selected: Vec<String> = ranked.into_iter().take(max_tags).cloned().collect();
    let tag_list = if selected.is_empty() {
        tags::infer_tags(prompt, max_tags)
    } else {
        selected
    };

    #[allow(clippy::cast_precision_loss)]
    let complexity = (tokens.len() as f64 / COMPLEXITY_SATURATION as f64).clamp(0.0, 1.0);

    TagInference {
        tags: tag_list,
        temperature: default_temperature.clamp(0.0, 1.0),
        complexity,
    }
}
