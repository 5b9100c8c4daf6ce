//! Key point selection, the hot path.
//!
//! Given a prompt, its inferred tags, and a temperature in [0, 1], pick an
//! ordered subset of stable key points to inject. Selection is pure and
//! deterministic: identical inputs produce identical output, all arithmetic
//! in IEEE-754 f64 with fixed constants.

use crate::models::{KeyPoint, Playbook};
use crate::tags;

/// Score at which a key point counts as proven.
pub const HIGH_CONFIDENCE_THRESHOLD: i64 = 2;

/// Weight floor preventing total exclusion of any candidate.
const MULTIPLIER_FLOOR: f64 = 0.05;

/// Minimum relaxed working set when tag matches are sparse.
const MIN_WORKING_SET: usize = 15;

/// Prompt cues that clamp the temperature down for urgent work.
const URGENT_CUES: &[&str] = &["fix", "bug", "error", "urgent", "critical", "broken"];
/// Prompt cues that clamp the temperature for production work.
const PRODUCTION_CUES: &[&str] = &["production", "deploy", "release", "customer"];
/// Prompt cues that lift the temperature for exploratory work.
const EXPLORATORY_CUES: &[&str] = &["explore", "learn", "research", "alternative", "innovative"];

/// The two selection layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Proven knowledge: `score >= 2`.
    HighConfidence,
    /// Unproven but plausible: everything else.
    Recommendation,
}

impl Layer {
    /// Classifies a key point by score.
    #[must_use]
    pub const fn for_score(score: i64) -> Self {
        if score >= HIGH_CONFIDENCE_THRESHOLD {
            Self::HighConfidence
        } else {
            Self::Recommendation
        }
    }
}

/// Inputs to one selection pass.
#[derive(Debug, Clone)]
pub struct SelectionRequest<'a> {
    /// The raw user prompt.
    pub prompt: &'a str,
    /// Normalized tags inferred for the prompt.
    pub prompt_tags: &'a [String],
    /// Selection temperature in [0, 1].
    pub temperature: f64,
    /// Maximum number of key points returned.
    pub limit: usize,
}

/// One selected key point with its computed weight.
#[derive(Debug, Clone)]
pub struct Selected {
    /// The chosen key point.
    pub key_point: KeyPoint,
    /// Final selection weight.
    pub weight: f64,
    /// The layer it was scored in.
    pub layer: Layer,
}

/// The selection engine.
#[derive(Debug, Clone)]
pub struct Selector {
    adaptive_temperature: bool,
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector {
    /// Creates a selector with the adaptive temperature override enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            adaptive_temperature: true,
        }
    }

    /// Enables or disables the keyword temperature override.
    #[must_use]
    pub const fn with_adaptive_temperature(mut self, enabled: bool) -> Self {
        self.adaptive_temperature = enabled;
        self
    }

    /// Selects up to `limit` stable key points for the prompt, best first.
    #[must_use]
    pub fn select(&self, playbook: &Playbook, request: &SelectionRequest<'_>) -> Vec<Selected> {
        if request.limit == 0 || playbook.is_empty() {
            return Vec::new();
        }

        let temperature = if self.adaptive_temperature {
            adjust_temperature(request.prompt, request.temperature)
        } else {
            request.temperature
        }
        .clamp(0.0, 1.0);

        let prompt_tokens = tags::significant_tokens(request.prompt);
        let candidates = gather_candidates(playbook, request, &prompt_tokens);

        let risk_ceiling = if temperature <= 0.4 { 0.8 } else { 0.6 };
        let mut scored: Vec<Selected> = candidates
            .into_iter()
            .filter(|kp| kp.risk_level <= risk_ceiling)
            .map(|kp| score_candidate(kp, request, &prompt_tokens, temperature))
            .collect();

        // Primary ordering; the diversity pass below may locally demote.
        sort_selected(&mut scored);
        apply_diversity_floor(scored, request.limit)
    }
}

/// Candidate filter with relaxation.
///
/// Keeps stable key points that share a tag with the prompt or contain a
/// significant prompt token; when that leaves fewer than `limit * 2`
/// candidates, tops up with the best-scored remaining stable items to a
/// working set of `max(limit * 2, 15)`.
fn gather_candidates<'a>(
    playbook: &'a Playbook,
    request: &SelectionRequest<'_>,
    prompt_tokens: &[String],
) -> Vec<&'a KeyPoint> {
    let mut matched: Vec<&KeyPoint> = Vec::new();
    let mut rest: Vec<&KeyPoint> = Vec::new();

    for kp in playbook.stable() {
        let tag_overlap = kp
            .tags
            .iter()
            .any(|tag| request.prompt_tags.contains(tag));
        let token_hit = tags::hits(prompt_tokens, &kp.text()) > 0;
        if tag_overlap || token_hit {
            matched.push(kp);
        } else {
            rest.push(kp);
        }
    }

    let threshold = request.limit * 2;
    if matched.len() < threshold {
        let working_set = threshold.max(MIN_WORKING_SET);
        rest.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        for kp in rest {
            if matched.len() >= working_set {
                break;
            }
            matched.push(kp);
        }
    }

    matched
}

fn score_candidate(
    kp: &KeyPoint,
    request: &SelectionRequest<'_>,
    prompt_tokens: &[String],
    temperature: f64,
) -> Selected {
    let coverage = tags::coverage(request.prompt_tags, &kp.tags);
    #[allow(clippy::cast_precision_loss)]
    let hits = tags::hits(prompt_tokens, &kp.text()) as f64;
    #[allow(clippy::cast_precision_loss)]
    let clamped_score = kp.score.clamp(-5, 20) as f64;

    let base = 10.0 * coverage + 3.0 * clamped_score + 5.0 * hits;

    let layer = Layer::for_score(kp.score);
    let mut multiplier = temperature_multiplier(layer, temperature);

    // Multi-dimensional tilt.
    match layer {
        Layer::HighConfidence => {
            multiplier += 0.3 * kp.effect_rating;
            if kp.risk_level <= -0.5 {
                multiplier += 0.2;
            }
        },
        Layer::Recommendation => {
            multiplier += 0.4 * kp.innovation_level;
            if kp.risk_level >= -0.2 {
                multiplier *= 0.8;
            }
        },
    }

    Selected {
        key_point: kp.clone(),
        weight: base * multiplier.max(MULTIPLIER_FLOOR),
        layer,
    }
}

/// The piecewise temperature multiplier, before the dimensional tilt.
///
/// Exposed so tests can probe the crossover between the layers directly.
#[must_use]
pub fn temperature_multiplier(layer: Layer, temperature: f64) -> f64 {
    match layer {
        Layer::HighConfidence => {
            let mut multiplier = 1.5f64.mul_add(-temperature, 2.5);
            if temperature <= 0.3 {
                multiplier += 0.5;
            } else if temperature >= 0.7 {
                multiplier -= 0.3;
            }
            multiplier
        },
        Layer::Recommendation => {
            let mut multiplier = 2.0 * temperature;
            if temperature <= 0.3 {
                multiplier *= 0.3;
            } else if temperature >= 0.7 {
                multiplier += 0.5;
            }
            multiplier
        },
    }
}

/// Keyword override of the LLM-supplied temperature.
///
/// Urgency wins over production which wins over exploration, so a prompt
/// that is both urgent and exploratory stays conservative.
#[must_use]
pub fn adjust_temperature(prompt: &str, temperature: f64) -> f64 {
    let lowered = prompt.to_lowercase();
    let has = |cues: &[&str]| cues.iter().any(|cue| lowered.contains(cue));

    if has(URGENT_CUES) {
        temperature.min(0.3)
    } else if has(PRODUCTION_CUES) {
        temperature.min(0.5)
    } else if has(EXPLORATORY_CUES) {
        temperature.max(0.7)
    } else {
        temperature
    }
}

/// Descending weight, ties broken by higher score, then name.
fn sort_selected(scored: &mut [Selected]) {
    scored.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.key_point.score.cmp(&a.key_point.score))
            .then_with(|| a.key_point.name.cmp(&b.key_point.name))
    });
}

/// Greedy diversity pass.
///
/// Picks the heaviest remaining candidate, halving the effective weight of
/// any candidate whose primary tag already holds `limit / 2` slots in the
/// current selection; dominated tags still win when nothing else remains.
fn apply_diversity_floor(pool: Vec<Selected>, limit: usize) -> Vec<Selected> {
    let tag_cap = (limit / 2).max(1);
    let mut remaining = pool;
    let mut picked: Vec<Selected> = Vec::new();
    let mut tag_counts: std::collections::HashMap<String, usize> =
        std::collections::HashMap::new();

    while picked.len() < limit && !remaining.is_empty() {
        let mut best_index = 0;
        let mut best_weight = f64::NEG_INFINITY;

        for (index, candidate) in remaining.iter().enumerate() {
            let mut weight = candidate.weight;
            if let Some(primary) = candidate.key_point.primary_tag() {
                if tag_counts.get(primary).copied().unwrap_or(0) >= tag_cap {
                    weight /= 2.0;
                }
            }
            let better = weight > best_weight
                || (weight == best_weight && {
                    let best = &remaining[best_index];
                    candidate.key_point.score > best.key_point.score
                        || (candidate.key_point.score == best.key_point.score
                            && candidate.key_point.name < best.key_point.name)
                });
            if better {
                best_index = index;
                best_weight = weight;
            }
        }

        let chosen = remaining.remove(best_index);
        if let Some(primary) = chosen.key_point.primary_tag() {
            *tag_counts.entry(primary.to_string()).or_insert(0) += 1;
        }
        picked.push(chosen);
    }

    picked
}
