//! The reflection pipeline.
//!
//! Turns a transcript plus the current playbook into the next playbook:
//! score existing key points, merge near-duplicates, admit new lessons as
//! pending, promote corroborated ones, prune, evict, reorder, renumber.
//! The LLM call happens outside the exclusive lock; if the playbook moved
//! underneath it, the outcome is rebased onto the newer state or the
//! reflection is discarded.

use crate::llm::{LlmGateway, MergeGroup, ReflectionOutcome, ReflectionRequest};
use crate::models::{
    DEFAULT_EFFECT_RATING, DEFAULT_INNOVATION_LEVEL, DEFAULT_RISK_LEVEL, KeyPoint, KeyPointBody,
    KeyPointName, Playbook, Turn,
};
use crate::storage::{PlaybookLock, PlaybookStore};
use crate::tags;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Thresholds governing one apply pass.
#[derive(Debug, Clone)]
pub struct ApplyLimits {
    /// Minimum LLM-reported similarity to merge.
    pub merge_threshold: f64,
    /// Score at or below which key points are pruned.
    pub prune_threshold: i64,
    /// Maximum playbook size after eviction.
    pub max_kpts: usize,
}

impl Default for ApplyLimits {
    fn default() -> Self {
        Self {
            merge_threshold: crate::config::DEFAULT_MERGE_THRESHOLD,
            prune_threshold: crate::config::DEFAULT_PRUNE_THRESHOLD,
            max_kpts: crate::config::DEFAULT_MAX_KPTS,
        }
    }
}

/// What one reflection changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionStats {
    /// Existing key points that received a rating.
    pub rated: usize,
    /// Key points absorbed into merge survivors.
    pub merged: usize,
    /// New pending key points admitted.
    pub added: usize,
    /// Pending key points promoted to stable.
    pub promoted: usize,
    /// Key points pruned for low score.
    pub pruned: usize,
    /// Key points evicted for capacity.
    pub evicted: usize,
    /// Final playbook size.
    pub total: usize,
    /// Tags carried by the newly admitted key points.
    pub new_tags: Vec<String>,
}

/// Drives reflection against a store and a gateway.
pub struct Reflector<'a> {
    store: &'a PlaybookStore,
    gateway: &'a dyn LlmGateway,
    limits: ApplyLimits,
}

impl<'a> Reflector<'a> {
    /// Creates a reflector with default limits.
    #[must_use]
    pub fn new(store: &'a PlaybookStore, gateway: &'a dyn LlmGateway) -> Self {
        Self {
            store,
            gateway,
            limits: ApplyLimits::default(),
        }
    }

    /// Sets the apply limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ApplyLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Runs one reflection over the transcript and persists the result.
    ///
    /// Locking protocol: load under exclusive lock, release for the LLM
    /// call, re-acquire, re-read, and rebase if the file changed in the
    /// window.
    ///
    /// # Errors
    ///
    /// Propagates storage and gateway errors; returns
    /// [`Error::ConcurrentUpdate`] when a rebase is infeasible and
    /// [`Error::ReflectionRejected`] when the merged playbook fails
    /// validation (the on-disk file is left untouched either way).
    pub fn run(&self, turns: &[Turn], budget: Duration) -> Result<ReflectionStats> {
        let (loaded, fingerprint) = {
            let _lock = PlaybookLock::exclusive(self.store.path())?;
            let loaded = self.store.load()?;
            let fingerprint = self.store.fingerprint()?;
            (loaded, fingerprint)
        };

        // Long-latency call, issued with no lock held.
        let outcome = self.gateway.reflect(
            &ReflectionRequest {
                turns: turns.to_vec(),
                playbook: loaded.clone(),
            },
            budget,
        )?;

        let _lock = PlaybookLock::exclusive(self.store.path())?;
        let (mut playbook, outcome) = if self.store.fingerprint()? == fingerprint {
            (loaded, outcome)
        } else {
            tracing::info!("playbook changed during reflection, rebasing");
            let latest = self.store.load()?;
            let rebased = rebase_outcome(&outcome, &loaded, &latest)?;
            (latest, rebased)
        };

        self.finish(&mut playbook, &outcome)
    }

    fn finish(
        &self,
        playbook: &mut Playbook,
        outcome: &ReflectionOutcome,
    ) -> Result<ReflectionStats> {
        let snapshot = PlaybookStore::snapshot(playbook);
        let stats = apply_outcome(playbook, outcome, &self.limits);

        match self.store.store(playbook) {
            Ok(()) => Ok(stats),
            Err(Error::InvariantViolation(invariant)) => {
                PlaybookStore::restore(playbook, snapshot);
                Err(Error::ReflectionRejected { invariant })
            },
            Err(other) => {
                PlaybookStore::restore(playbook, snapshot);
                Err(other)
            },
        }
    }
}

/// Applies a reflection outcome to a playbook in place.
///
/// Pure with respect to the filesystem; exposed so tests can script
/// outcomes without a gateway.
pub fn apply_outcome(
    playbook: &mut Playbook,
    outcome: &ReflectionOutcome,
    limits: &ApplyLimits,
) -> ReflectionStats {
    let mut stats = ReflectionStats::default();

    apply_deltas(playbook, outcome, &mut stats);
    apply_merges(playbook, &outcome.merges, limits.merge_threshold, &mut stats);
    admit_new(playbook, outcome, &mut stats);
    promote(playbook, &outcome.promotions, &mut stats);
    prune(playbook, limits.prune_threshold, &mut stats);
    evict(playbook, limits.max_kpts, &mut stats);
    reorder(playbook);
    renumber(playbook);

    stats.total = playbook.key_points.len();
    stats
}

/// Step: apply score deltas, tag additions, and rewrites.
fn apply_deltas(playbook: &mut Playbook, outcome: &ReflectionOutcome, stats: &mut ReflectionStats) {
    for delta in &outcome.deltas {
        let Some(kp) = playbook.get_mut(&delta.name) else {
            continue;
        };
        kp.score += delta.rating.score_delta();
        stats.rated += 1;

        if !delta.tag_additions.is_empty() {
            let mut combined = kp.tags.clone();
            combined.extend(delta.tag_additions.iter().cloned());
            kp.tags = tags::normalize(&combined);
        }
        if let Some(rewrite) = &delta.text_rewrite {
            if !rewrite.trim().is_empty() {
                kp.body = KeyPointBody::legacy(rewrite.clone());
            }
        }
    }
}

/// Step: merge semantically similar key points.
///
/// Groups below the threshold are discarded. When two groups claim the same
/// member, the group with the higher reported similarity wins. The
/// highest-scored member survives with the summed score, the unioned tag
/// set, and its own text and dimensional attributes; absorbing anything
/// counts as corroboration, so a pending survivor graduates.
fn apply_merges(
    playbook: &mut Playbook,
    merges: &[MergeGroup],
    threshold: f64,
    stats: &mut ReflectionStats,
) {
    let mut groups: Vec<&MergeGroup> = merges
        .iter()
        .filter(|group| group.similarity >= threshold && group.members.len() >= 2)
        .collect();
    groups.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.members.cmp(&b.members))
    });

    let mut claimed: HashSet<KeyPointName> = HashSet::new();

    for group in groups {
        let members: Vec<KeyPointName> = group
            .members
            .iter()
            .filter(|name| !claimed.contains(*name) && playbook.get(name).is_some())
            .cloned()
            .collect();
        if members.len() < 2 {
            continue;
        }
        claimed.extend(members.iter().cloned());

        let Some(survivor_name) = members
            .iter()
            .max_by(|a, b| {
                let score_a = playbook.get(a).map_or(i64::MIN, |kp| kp.score);
                let score_b = playbook.get(b).map_or(i64::MIN, |kp| kp.score);
                score_a.cmp(&score_b).then_with(|| b.cmp(a))
            })
            .cloned()
        else {
            continue;
        };

        let total_score: i64 = members
            .iter()
            .filter_map(|name| playbook.get(name).map(|kp| kp.score))
            .sum();

        let mut union: Vec<String> = playbook
            .get(&survivor_name)
            .map(|kp| kp.tags.clone())
            .unwrap_or_default();
        for name in &members {
            if name == &survivor_name {
                continue;
            }
            if let Some(kp) = playbook.get(name) {
                union.extend(kp.tags.iter().cloned());
            }
        }
        let union = tags::normalize(&union);

        let absorbed: Vec<KeyPointName> = members
            .iter()
            .filter(|name| **name != survivor_name)
            .cloned()
            .collect();
        stats.merged += absorbed.len();

        if let Some(survivor) = playbook.get_mut(&survivor_name) {
            survivor.score = total_score;
            survivor.tags = union;
            survivor.pending = false;
        }
        playbook
            .key_points
            .retain(|kp| !absorbed.contains(&kp.name));
    }
}

/// Step: admit new candidates as pending key points.
fn admit_new(playbook: &mut Playbook, outcome: &ReflectionOutcome, stats: &mut ReflectionStats) {
    let mut existing_texts: HashSet<String> =
        playbook.key_points.iter().map(KeyPoint::text).collect();

    for candidate in &outcome.new_key_points {
        let text = candidate.text.trim();
        if text.is_empty() || existing_texts.contains(text) {
            continue;
        }

        let mut normalized = tags::normalize(&candidate.tags);
        if normalized.is_empty() {
            normalized = tags::infer_tags(text, tags::MAX_INFERRED_TAGS);
        }

        let kp = KeyPoint {
            name: playbook.next_name(),
            body: KeyPointBody::legacy(text.to_string()),
            tags: normalized,
            score: 0,
            effect_rating: candidate.effect_rating.unwrap_or(DEFAULT_EFFECT_RATING),
            risk_level: candidate.risk_level.unwrap_or(DEFAULT_RISK_LEVEL),
            innovation_level: candidate
                .innovation_level
                .unwrap_or(DEFAULT_INNOVATION_LEVEL),
            pending: true,
        };
        existing_texts.insert(kp.text());
        stats.new_tags.extend(kp.tags.iter().cloned());
        playbook.key_points.push(kp);
        stats.added += 1;
    }
}

/// Step: graduate corroborated pending key points.
fn promote(playbook: &mut Playbook, promotions: &[KeyPointName], stats: &mut ReflectionStats) {
    for name in promotions {
        if let Some(kp) = playbook.get_mut(name) {
            if kp.pending {
                kp.pending = false;
                stats.promoted += 1;
            }
        }
    }
}

/// Step: drop key points at or below the prune threshold.
fn prune(playbook: &mut Playbook, threshold: i64, stats: &mut ReflectionStats) {
    let before = playbook.key_points.len();
    playbook.key_points.retain(|kp| kp.score > threshold);
    stats.pruned += before - playbook.key_points.len();
}

/// Step: evict for capacity.
///
/// Lowest-scored stable items go first (ties evict the higher-numbered
/// name); if the stable region alone cannot absorb the overflow, the
/// oldest pending items follow.
fn evict(playbook: &mut Playbook, max_kpts: usize, stats: &mut ReflectionStats) {
    while playbook.key_points.len() > max_kpts {
        let victim = playbook
            .key_points
            .iter()
            .filter(|kp| !kp.pending)
            .min_by(|a, b| a.score.cmp(&b.score).then_with(|| b.name.cmp(&a.name)))
            .map(|kp| kp.name.clone())
            .or_else(|| {
                playbook
                    .key_points
                    .iter()
                    .find(|kp| kp.pending)
                    .map(|kp| kp.name.clone())
            });

        let Some(victim) = victim else {
            break;
        };
        playbook.key_points.retain(|kp| kp.name != victim);
        stats.evicted += 1;
    }
}

/// Step: stable region by descending score then name, pending region in
/// insertion order.
fn reorder(playbook: &mut Playbook) {
    let mut stable: Vec<KeyPoint> = Vec::new();
    let mut pending: Vec<KeyPoint> = Vec::new();
    for kp in playbook.key_points.drain(..) {
        if kp.pending {
            pending.push(kp);
        } else {
            stable.push(kp);
        }
    }
    stable.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
    stable.extend(pending);
    playbook.key_points = stable;
}

/// Step: assign the dense prefix `kpt_001..kpt_N` in final order.
fn renumber(playbook: &mut Playbook) {
    for (index, kp) in playbook.key_points.iter_mut().enumerate() {
        kp.name = KeyPointName::from_index(index + 1);
    }
}

/// Rebases an outcome computed against `snapshot` onto `latest`.
///
/// Names are unstable across renumbering, so references resolve through
/// the statement text: a name valid in the snapshot maps to whichever key
/// point in `latest` carries the same text. Unresolvable references are
/// dropped; when a majority of references drop, the reflection is stale
/// enough to discard.
///
/// # Errors
///
/// Returns [`Error::ConcurrentUpdate`] when fewer than half of the
/// outcome's references survive the rebase.
pub fn rebase_outcome(
    outcome: &ReflectionOutcome,
    snapshot: &Playbook,
    latest: &Playbook,
) -> Result<ReflectionOutcome> {
    let snapshot_text: HashMap<&KeyPointName, String> = snapshot
        .key_points
        .iter()
        .map(|kp| (&kp.name, kp.text()))
        .collect();
    let latest_by_text: HashMap<String, KeyPointName> = latest
        .key_points
        .iter()
        .map(|kp| (kp.text(), kp.name.clone()))
        .collect();

    let resolve = |name: &KeyPointName| -> Option<KeyPointName> {
        let text = snapshot_text.get(name)?;
        // Fast path: the same name still carries the same statement.
        if latest.get(name).map(KeyPoint::text).as_deref() == Some(text.as_str()) {
            return Some(name.clone());
        }
        latest_by_text.get(text.as_str()).cloned()
    };

    let mut total = 0usize;
    let mut resolved = 0usize;

    let deltas = outcome
        .deltas
        .iter()
        .filter_map(|delta| {
            total += 1;
            resolve(&delta.name).map(|name| {
                resolved += 1;
                let mut delta = delta.clone();
                delta.name = name;
                delta
            })
        })
        .collect();

    let merges = outcome
        .merges
        .iter()
        .filter_map(|group| {
            let members: Vec<KeyPointName> = group
                .members
                .iter()
                .filter_map(|name| {
                    total += 1;
                    let mapped = resolve(name);
                    if mapped.is_some() {
                        resolved += 1;
                    }
                    mapped
                })
                .collect();
            if members.len() >= 2 {
                Some(MergeGroup {
                    members,
                    similarity: group.similarity,
                })
            } else {
                None
            }
        })
        .collect();

    let promotions = outcome
        .promotions
        .iter()
        .filter_map(|name| {
            total += 1;
            let mapped = resolve(name);
            if mapped.is_some() {
                resolved += 1;
            }
            mapped
        })
        .collect();

    if total > 0 && resolved * 2 < total {
        return Err(Error::ConcurrentUpdate);
    }

    Ok(ReflectionOutcome {
        new_key_points: outcome.new_key_points.clone(),
        deltas,
        merges,
        promotions,
    })
}
