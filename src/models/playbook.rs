//! The playbook document and its on-disk JSON form.
//!
//! On disk the `key_points` array holds stable entries first, a
//! `{"divider": true}` sentinel, then pending entries. Legacy files may
//! contain bare strings instead of objects; unknown objects are skipped and
//! round-trip safely because serialization regenerates the canonical form.

use super::keypoint::{
    DEFAULT_EFFECT_RATING, DEFAULT_INNOVATION_LEVEL, DEFAULT_RISK_LEVEL, KeyPoint, KeyPointBody,
    KeyPointName,
};
use crate::tags;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Schema version written by this crate.
pub const SCHEMA_VERSION: &str = "2.0";

/// Canonical body shape used when writing the playbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyShape {
    /// Write a single `text` field (maximally compatible).
    #[default]
    Legacy,
    /// Write `when`/`do` fields where the body is structured.
    WhenDo,
}

/// The persisted collection of key points for a project.
#[derive(Debug, Clone, PartialEq)]
pub struct Playbook {
    /// Schema version tag.
    pub version: String,
    /// Timestamp of the last successful store.
    pub last_updated: Option<DateTime<Utc>>,
    /// Ordered key points: the stable region precedes the pending region.
    pub key_points: Vec<KeyPoint>,
}

impl Default for Playbook {
    fn default() -> Self {
        Self::empty()
    }
}

impl Playbook {
    /// Creates an empty playbook at the current schema version.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            last_updated: None,
            key_points: Vec::new(),
        }
    }

    /// Returns true when the playbook holds no key points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key_points.is_empty()
    }

    /// Iterates over the stable region.
    pub fn stable(&self) -> impl Iterator<Item = &KeyPoint> {
        self.key_points.iter().filter(|kp| !kp.pending)
    }

    /// Iterates over the pending region.
    pub fn pending(&self) -> impl Iterator<Item = &KeyPoint> {
        self.key_points.iter().filter(|kp| kp.pending)
    }

    /// Looks up a key point by name.
    #[must_use]
    pub fn get(&self, name: &KeyPointName) -> Option<&KeyPoint> {
        self.key_points.iter().find(|kp| &kp.name == name)
    }

    /// Mutable lookup by name.
    pub fn get_mut(&mut self, name: &KeyPointName) -> Option<&mut KeyPoint> {
        self.key_points.iter_mut().find(|kp| &kp.name == name)
    }

    /// Every distinct tag in use, sorted.
    #[must_use]
    pub fn all_tags(&self) -> BTreeSet<String> {
        self.key_points
            .iter()
            .flat_map(|kp| kp.tags.iter().cloned())
            .collect()
    }

    /// The next free `kpt_NNN` name, one past the highest numbered entry.
    #[must_use]
    pub fn next_name(&self) -> KeyPointName {
        let max = self
            .key_points
            .iter()
            .filter_map(|kp| kp.name.index())
            .max()
            .unwrap_or(0);
        KeyPointName::from_index(max + 1)
    }

    /// Parses a playbook from its JSON text form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the document is not JSON or the
    /// top level has the wrong shape. Individual malformed entries are
    /// skipped rather than failing the whole document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let stored: StoredPlaybook = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("playbook parse: {e}")))?;

        let last_updated = stored
            .last_updated
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));

        let mut key_points = Vec::new();
        let mut seen_divider = false;

        for entry in stored.key_points {
            match entry {
                serde_json::Value::String(text) => {
                    // Legacy files stored bare strings for stable items.
                    if text.trim().is_empty() {
                        continue;
                    }
                    key_points.push(decoded_from_text(text, seen_divider));
                },
                serde_json::Value::Object(map) => {
                    if map.get("divider").and_then(serde_json::Value::as_bool) == Some(true) {
                        seen_divider = true;
                        continue;
                    }
                    if let Some(kp) = decode_entry(&map, seen_divider) {
                        key_points.push(kp);
                    }
                },
                // Unknown entry kinds are ignored for forward compatibility.
                _ => {},
            }
        }

        assign_missing_names(&mut key_points);

        Ok(Self {
            version: stored.version.unwrap_or_else(|| SCHEMA_VERSION.to_string()),
            last_updated,
            key_points,
        })
    }

    /// Serializes the playbook to pretty JSON with the divider sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if serialization fails, which only
    /// happens for non-finite floats.
    pub fn to_json(&self, shape: BodyShape) -> Result<String> {
        let mut entries: Vec<serde_json::Value> = self
            .stable()
            .map(|kp| encode_entry(kp, shape))
            .collect::<Result<_>>()?;

        let pending: Vec<serde_json::Value> = self
            .pending()
            .map(|kp| encode_entry(kp, shape))
            .collect::<Result<_>>()?;

        if !pending.is_empty() {
            entries.push(serde_json::json!({
                "divider": true,
                "text": "--- pending key points below ---",
            }));
            entries.extend(pending);
        }

        let doc = serde_json::json!({
            "version": self.version,
            "last_updated": self.last_updated.map(|ts| ts.to_rfc3339()),
            "key_points": entries,
        });

        serde_json::to_string_pretty(&doc)
            .map_err(|e| Error::InvalidInput(format!("playbook serialize: {e}")))
    }
}

/// Top-level wire shape; entries are decoded leniently one by one.
#[derive(Debug, Deserialize)]
struct StoredPlaybook {
    version: Option<String>,
    last_updated: Option<String>,
    #[serde(default)]
    key_points: Vec<serde_json::Value>,
}

/// Typed view of a single stored key point object.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredKeyPoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    when: Option<String>,
    #[serde(rename = "do", skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    effect_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    risk_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    innovation_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending: Option<bool>,
}

fn decoded_from_text(text: String, after_divider: bool) -> KeyPoint {
    let inferred = tags::infer_tags(&text, tags::MAX_INFERRED_TAGS);
    KeyPoint {
        name: KeyPointName::new(""),
        tags: inferred,
        body: KeyPointBody::legacy(text),
        score: 0,
        effect_rating: DEFAULT_EFFECT_RATING,
        risk_level: DEFAULT_RISK_LEVEL,
        innovation_level: DEFAULT_INNOVATION_LEVEL,
        pending: after_divider,
    }
}

fn decode_entry(
    map: &serde_json::Map<String, serde_json::Value>,
    after_divider: bool,
) -> Option<KeyPoint> {
    let stored: StoredKeyPoint =
        serde_json::from_value(serde_json::Value::Object(map.clone())).ok()?;

    let body = match (stored.when, stored.action, stored.text) {
        (Some(when), Some(action), _) if !when.trim().is_empty() => {
            KeyPointBody::structured(when, action)
        },
        (_, _, Some(text)) => KeyPointBody::legacy(text),
        _ => return None,
    };
    if body.is_empty() {
        return None;
    }

    let mut normalized = tags::normalize(&stored.tags);
    if normalized.is_empty() {
        normalized = tags::infer_tags(&body.render(), tags::MAX_INFERRED_TAGS);
    }

    Some(KeyPoint {
        name: KeyPointName::new(stored.name.unwrap_or_default()),
        body,
        tags: normalized,
        score: stored.score.unwrap_or(0),
        effect_rating: stored.effect_rating.unwrap_or(DEFAULT_EFFECT_RATING),
        risk_level: stored.risk_level.unwrap_or(DEFAULT_RISK_LEVEL),
        innovation_level: stored.innovation_level.unwrap_or(DEFAULT_INNOVATION_LEVEL),
        pending: stored.pending.unwrap_or(false) || after_divider,
    })
}

fn encode_entry(kp: &KeyPoint, shape: BodyShape) -> Result<serde_json::Value> {
    let mut stored = StoredKeyPoint {
        name: Some(kp.name.as_str().to_string()),
        tags: kp.tags.clone(),
        score: Some(kp.score),
        effect_rating: Some(kp.effect_rating),
        risk_level: Some(kp.risk_level),
        innovation_level: Some(kp.innovation_level),
        pending: if kp.pending { Some(true) } else { None },
        ..StoredKeyPoint::default()
    };

    match (&kp.body, shape) {
        (KeyPointBody::Structured { when, action }, BodyShape::WhenDo) => {
            stored.when = Some(when.clone());
            stored.action = Some(action.clone());
        },
        (body, _) => {
            stored.text = Some(body.render());
        },
    }

    serde_json::to_value(stored).map_err(|e| Error::InvalidInput(format!("key point encode: {e}")))
}

/// Gives unnamed entries fresh names past the highest numbered one.
fn assign_missing_names(key_points: &mut [KeyPoint]) {
    let mut max = key_points
        .iter()
        .filter_map(|kp| kp.name.index())
        .max()
        .unwrap_or(0);

    for kp in key_points.iter_mut() {
        if kp.name.as_str().is_empty() {
            max += 1;
            kp.name = KeyPointName::from_index(max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Playbook {
        let mut a = KeyPoint::new(
            KeyPointName::from_index(1),
            KeyPointBody::legacy("Use exponential backoff for payment retries"),
        );
        a.tags = vec!["payment".to_string(), "retry".to_string()];
        a.score = 3;

        let mut b = KeyPoint::new(
            KeyPointName::from_index(2),
            KeyPointBody::structured("tests are flaky", "pin the random seed"),
        );
        b.tags = vec!["testing".to_string()];
        b.pending = true;

        Playbook {
            version: SCHEMA_VERSION.to_string(),
            last_updated: None,
            key_points: vec![a, b],
        }
    }

    #[test]
    fn test_roundtrip_preserves_key_points() {
        let playbook = sample();
        let json = playbook.to_json(BodyShape::WhenDo).unwrap();
        let reloaded = Playbook::from_json(&json).unwrap();
        assert_eq!(reloaded.key_points, playbook.key_points);
        assert_eq!(reloaded.version, SCHEMA_VERSION);
    }

    #[test]
    fn test_divider_partitions_regions() {
        let json = sample().to_json(BodyShape::Legacy).unwrap();
        assert!(json.contains("\"divider\": true"));

        let reloaded = Playbook::from_json(&json).unwrap();
        assert_eq!(reloaded.stable().count(), 1);
        assert_eq!(reloaded.pending().count(), 1);
    }

    #[test]
    fn test_legacy_shape_flattens_structured_bodies() {
        let json = sample().to_json(BodyShape::Legacy).unwrap();
        let reloaded = Playbook::from_json(&json).unwrap();
        let pending: Vec<_> = reloaded.pending().collect();
        assert_eq!(
            pending[0].text(),
            "When tests are flaky, do pin the random seed"
        );
        assert!(matches!(pending[0].body, KeyPointBody::Legacy { .. }));
    }

    #[test]
    fn test_bare_string_entries_are_upgraded() {
        let raw = r#"{
            "version": "1.0",
            "key_points": [
                "Always run the linter before committing",
                {"divider": true},
                {"text": "Prefer feature flags for risky rollouts", "tags": ["deploy"]}
            ]
        }"#;
        let playbook = Playbook::from_json(raw).unwrap();
        assert_eq!(playbook.key_points.len(), 2);
        assert!(!playbook.key_points[0].pending);
        assert!(!playbook.key_points[0].tags.is_empty());
        assert!(playbook.key_points[1].pending);
        assert_eq!(playbook.key_points[0].name.as_str(), "kpt_001");
    }

    #[test]
    fn test_unknown_objects_are_skipped() {
        let raw = r#"{
            "version": "2.0",
            "key_points": [
                {"text": "Keep schema migrations reversible", "tags": ["database"]},
                {"comment": "not a key point"},
                42
            ]
        }"#;
        let playbook = Playbook::from_json(raw).unwrap();
        assert_eq!(playbook.key_points.len(), 1);
    }

    #[test]
    fn test_when_do_read_back() {
        let raw = r#"{
            "version": "2.0",
            "key_points": [
                {"name": "kpt_001", "when": "an API call times out", "do": "retry twice then surface the error", "tags": ["api"]}
            ]
        }"#;
        let playbook = Playbook::from_json(raw).unwrap();
        assert!(matches!(
            playbook.key_points[0].body,
            KeyPointBody::Structured { .. }
        ));
    }

    #[test]
    fn test_next_name() {
        assert_eq!(Playbook::empty().next_name().as_str(), "kpt_001");
        assert_eq!(sample().next_name().as_str(), "kpt_003");
    }

    #[test]
    fn test_tagless_entries_get_inferred_tags() {
        let raw = r#"{
            "version": "2.0",
            "key_points": [
                {"text": "Cache database lookups aggressively in the hot path"}
            ]
        }"#;
        let playbook = Playbook::from_json(raw).unwrap();
        assert!(!playbook.key_points[0].tags.is_empty());
    }
}
