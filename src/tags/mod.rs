//! Tag normalization and overlap scoring.
//!
//! Everything here is a pure function; the selector and reflector both lean
//! on this module, so determinism matters more than cleverness.

mod stats;

pub use stats::TagStatistics;

use std::collections::BTreeSet;

/// Maximum length of a normalized tag.
pub const MAX_TAG_LEN: usize = 64;

/// Cap applied when synthesizing tags from free text.
pub const MAX_INFERRED_TAGS: usize = 5;

/// Words too generic to carry signal, either as tags or as prompt tokens.
const STOPWORDS: &[&str] = &[
    "the", "this", "that", "with", "from", "into", "your", "their", "have", "having", "using",
    "use", "used", "for", "and", "when", "while", "after", "before", "code", "error", "issue",
    "fix", "task", "please", "should", "would", "could", "about", "what", "make", "need", "want",
    "just", "like", "some", "them", "then", "than", "will", "does", "doesnt", "dont", "here",
    "there",
];

/// Normalizes a single tag to a lowercase ASCII slug.
///
/// Trims, lowercases, keeps alphanumerics and hyphens, converts internal
/// whitespace runs to a single hyphen, drops other punctuation, and caps
/// the length at [`MAX_TAG_LEN`]. Returns `None` when nothing survives.
#[must_use]
pub fn normalize_tag(raw: &str) -> Option<String> {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_hyphen = false;

    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else if c == '-' || c.is_whitespace() {
            pending_hyphen = true;
        }
        // All other punctuation (and non-ASCII) is stripped.
    }

    slug.truncate(MAX_TAG_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

/// Normalizes a list of tags, deduplicating while preserving order.
#[must_use]
pub fn normalize<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for tag in raw {
        if let Some(slug) = normalize_tag(tag.as_ref()) {
            if seen.insert(slug.clone()) {
                out.push(slug);
            }
        }
    }
    out
}

/// Fraction of prompt tags satisfied by the key point's tag set.
///
/// Defined as `|P ∩ K| / max(1, |P|)`; asymmetric on purpose, so that key
/// points covering what the user asked outrank broadly tagged ones.
#[must_use]
pub fn coverage(prompt_tags: &[String], kpt_tags: &[String]) -> f64 {
    if prompt_tags.is_empty() {
        return 0.0;
    }
    let kpt: BTreeSet<&str> = kpt_tags.iter().map(String::as_str).collect();
    let matched = prompt_tags
        .iter()
        .filter(|tag| kpt.contains(tag.as_str()))
        .count();
    #[allow(clippy::cast_precision_loss)]
    {
        matched as f64 / prompt_tags.len().max(1) as f64
    }
}

/// Extracts the significant tokens of a prompt: lowercase alphanumeric
/// words of three or more characters with stopwords removed, deduplicated
/// in order of first appearance.
#[must_use]
pub fn significant_tokens(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for token in tokenize(text) {
        if token.len() < 3 || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        if seen.insert(token.clone()) {
            out.push(token);
        }
    }
    out
}

/// Counts case-insensitive token-boundary matches of the given prompt
/// tokens inside a key point's text.
#[must_use]
pub fn hits(prompt_tokens: &[String], kpt_text: &str) -> usize {
    if prompt_tokens.is_empty() {
        return 0;
    }
    let wanted: BTreeSet<&str> = prompt_tokens.iter().map(String::as_str).collect();
    tokenize(kpt_text)
        .filter(|token| wanted.contains(token.as_str()))
        .count()
}

/// Heuristic tag extraction for text that arrived without tags.
///
/// This is the deterministic fallback used when the LLM is unavailable and
/// the synthesizer that guarantees every stored key point has at least one
/// tag.
#[must_use]
pub fn infer_tags(text: &str, max_tags: usize) -> Vec<String> {
    let mut out = Vec::new();
    for token in significant_tokens(text) {
        if token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        out.push(token);
        if out.len() >= max_tags {
            break;
        }
    }
    if out.is_empty() {
        out.push("general".to_string());
    }
    out
}

/// Splits text into lowercase alphanumeric tokens, duplicates included.
///
/// Exposed for frequency analysis in the heuristic tagger.
#[must_use]
pub fn tokenize_for_counting(text: &str) -> Vec<String> {
    tokenize(text).collect()
}

/// Splits text into lowercase alphanumeric tokens.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
}
