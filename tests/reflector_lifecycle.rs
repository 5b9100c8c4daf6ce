//! Reflection lifecycle: admission, promotion, merge, prune, evict, rebase.

mod common;

use common::{ScriptedGateway, keypoint, playbook_with, write_transcript};
use tempfile::TempDir;

use tacit::llm::{CandidateKeyPoint, KptDelta, KptRating, MergeGroup, ReflectionOutcome};
use tacit::models::{KeyPointName, Turn, load_transcript};
use tacit::reflector::{ApplyLimits, Reflector};
use tacit::storage::PlaybookStore;
use tacit::Error;
use std::time::Duration;

fn candidate(text: &str, tags: &[&str]) -> CandidateKeyPoint {
    CandidateKeyPoint {
        text: text.to_string(),
        tags: tags.iter().map(ToString::to_string).collect(),
        effect_rating: None,
        risk_level: None,
        innovation_level: None,
    }
}

fn turns() -> Vec<Turn> {
    vec![
        Turn::user("the payment gateway keeps timing out"),
        Turn::assistant("Added exponential backoff to the retry loop."),
    ]
}

#[test]
fn first_reflection_creates_one_pending_key_point() {
    let dir = TempDir::new().unwrap();
    let store = PlaybookStore::new(dir.path().join("playbook.json"));
    let gateway = ScriptedGateway::new().with_outcome(ReflectionOutcome {
        new_key_points: vec![candidate(
            "Use exponential backoff for payment retries",
            &["payment", "retry", "backoff"],
        )],
        ..ReflectionOutcome::default()
    });

    let stats = Reflector::new(&store, &gateway)
        .run(&turns(), Duration::from_secs(5))
        .unwrap();

    assert_eq!(stats.added, 1);
    assert_eq!(stats.total, 1);

    let playbook = store.load().unwrap();
    assert_eq!(playbook.key_points.len(), 1);
    let kp = &playbook.key_points[0];
    assert_eq!(kp.name.as_str(), "kpt_001");
    assert!(kp.pending);
    assert_eq!(kp.score, 0);
    assert_eq!(kp.tags, vec!["payment", "retry", "backoff"]);
}

#[test]
fn second_reflection_promotes_and_merges() {
    let dir = TempDir::new().unwrap();
    let store = PlaybookStore::new(dir.path().join("playbook.json"));

    // Seed: one pending lesson from a prior reflection.
    let mut seeded = playbook_with(vec![{
        let mut kp = keypoint(1, "Use exponential backoff for payment retries", &["payment", "retry"], 0);
        kp.pending = true;
        kp
    }]);
    store.store(&mut seeded).unwrap();

    // The second transcript re-demonstrates the lesson and also proposes a
    // near-duplicate, which merges into the promoted original.
    let gateway = ScriptedGateway::new().with_outcome(ReflectionOutcome {
        deltas: vec![KptDelta {
            name: KeyPointName::from_index(1),
            rating: KptRating::Helpful,
            tag_additions: vec!["backoff".to_string()],
            text_rewrite: None,
        }],
        promotions: vec![KeyPointName::from_index(1)],
        ..ReflectionOutcome::default()
    });

    let stats = Reflector::new(&store, &gateway)
        .run(&turns(), Duration::from_secs(5))
        .unwrap();
    assert_eq!(stats.promoted, 1);

    let playbook = store.load().unwrap();
    let kp = &playbook.key_points[0];
    assert!(!kp.pending);
    assert_eq!(kp.score, 1);
    assert!(kp.tags.contains(&"backoff".to_string()));

    // Third pass: the model reports a duplicate pair at similarity 0.85.
    let mut with_dup = store.load().unwrap();
    with_dup.key_points.push({
        let mut dup = keypoint(2, "Retry payments with exponential backoff", &["payment"], 0);
        dup.pending = true;
        dup
    });
    store.store(&mut with_dup).unwrap();

    let gateway = ScriptedGateway::new().with_outcome(ReflectionOutcome {
        merges: vec![MergeGroup {
            members: vec![KeyPointName::from_index(1), KeyPointName::from_index(2)],
            similarity: 0.85,
        }],
        ..ReflectionOutcome::default()
    });
    let stats = Reflector::new(&store, &gateway)
        .run(&turns(), Duration::from_secs(5))
        .unwrap();
    assert_eq!(stats.merged, 1);

    let playbook = store.load().unwrap();
    assert_eq!(playbook.key_points.len(), 1);
    let survivor = &playbook.key_points[0];
    // Scores summed: 1 + 0.
    assert_eq!(survivor.score, 1);
    assert_eq!(survivor.text(), "Use exponential backoff for payment retries");
    assert_eq!(survivor.name.as_str(), "kpt_001");
}

#[test]
fn sustained_harm_prunes_and_capacity_evicts() {
    let dir = TempDir::new().unwrap();
    let store = PlaybookStore::new(dir.path().join("playbook.json")).with_limits(250, -5);

    // 260 synthetic stable key points; ten of them already at score -6
    // from two prior harmful rounds.
    let mut kps = Vec::new();
    for i in 1..=260usize {
        let score = if i <= 10 { -6 + 3 } else { 1 + (i as i64 % 7) };
        let mut kp = keypoint(i, &format!("synthetic lesson {i}"), &["synthetic"], score);
        kp.tags = vec!["synthetic".to_string(), format!("topic-{}", i % 13)];
        kps.push(kp);
    }
    // The seeded file must itself satisfy the cap, so hold back ten.
    let extra: Vec<_> = kps.split_off(250);
    let mut playbook = playbook_with(kps);
    store.store(&mut playbook).unwrap();

    // Reintroduce the held-back ten as fresh candidates and rate the ten
    // harmful ones a third time: -3 + -3 -> crosses -5 and is pruned.
    let mut new_key_points: Vec<CandidateKeyPoint> = extra
        .iter()
        .map(|kp| candidate(&kp.text(), &["synthetic"]))
        .collect();
    // One more admission than the prune frees up, forcing an eviction.
    new_key_points.push(candidate("synthetic lesson 261", &["synthetic"]));

    let outcome = ReflectionOutcome {
        new_key_points,
        deltas: (1..=10)
            .map(|i| KptDelta {
                name: KeyPointName::from_index(i),
                rating: KptRating::Harmful,
                tag_additions: vec![],
                text_rewrite: None,
            })
            .collect(),
        ..ReflectionOutcome::default()
    };

    let gateway = ScriptedGateway::new().with_outcome(outcome);
    let limits = ApplyLimits {
        max_kpts: 250,
        ..ApplyLimits::default()
    };
    let stats = Reflector::new(&store, &gateway)
        .with_limits(limits)
        .run(&turns(), Duration::from_secs(5))
        .unwrap();

    assert_eq!(stats.pruned, 10);
    assert_eq!(stats.added, 11);
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.total, 250);

    let playbook = store.load().unwrap();
    assert_eq!(playbook.key_points.len(), 250);
    // Every surviving score is above the prune threshold.
    assert!(playbook.key_points.iter().all(|kp| kp.score > -5));
    // Renumbering yields the dense prefix.
    let mut indices: Vec<usize> = playbook
        .key_points
        .iter()
        .map(|kp| kp.name.index().unwrap())
        .collect();
    indices.sort_unstable();
    assert_eq!(indices, (1..=250).collect::<Vec<_>>());
}

#[test]
fn concurrent_write_triggers_rebase() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("playbook.json");
    let store = PlaybookStore::new(&path);

    let mut seeded = playbook_with(vec![
        keypoint(1, "lesson alpha", &["alpha"], 2),
        keypoint(2, "lesson beta", &["beta"], 1),
    ]);
    store.store(&mut seeded).unwrap();

    // While the reflection's LLM call is in flight, another process
    // reorders the playbook (alpha and beta swap names).
    let gateway = ScriptedGateway::new().with_outcome(ReflectionOutcome {
        deltas: vec![KptDelta {
            name: KeyPointName::from_index(2),
            rating: KptRating::Helpful,
            tag_additions: vec![],
            text_rewrite: None,
        }],
        ..ReflectionOutcome::default()
    });

    let interfering_store = PlaybookStore::new(&path);
    gateway.on_reflect(move || {
        let mut swapped = playbook_with(vec![
            keypoint(1, "lesson beta", &["beta"], 1),
            keypoint(2, "lesson alpha", &["alpha"], 2),
        ]);
        interfering_store.store(&mut swapped).unwrap();
    });

    let stats = Reflector::new(&store, &gateway)
        .run(&turns(), Duration::from_secs(5))
        .unwrap();
    assert_eq!(stats.rated, 1);

    // The +1 followed "lesson beta" to its new position.
    let playbook = store.load().unwrap();
    let beta = playbook
        .key_points
        .iter()
        .find(|kp| kp.text() == "lesson beta")
        .unwrap();
    assert_eq!(beta.score, 2);
    let alpha = playbook
        .key_points
        .iter()
        .find(|kp| kp.text() == "lesson alpha")
        .unwrap();
    assert_eq!(alpha.score, 2);
}

#[test]
fn infeasible_rebase_discards_the_reflection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("playbook.json");
    let store = PlaybookStore::new(&path);

    let mut seeded = playbook_with(vec![keypoint(1, "old lesson", &["old"], 2)]);
    store.store(&mut seeded).unwrap();

    let gateway = ScriptedGateway::new().with_outcome(ReflectionOutcome {
        deltas: vec![KptDelta {
            name: KeyPointName::from_index(1),
            rating: KptRating::Helpful,
            tag_additions: vec![],
            text_rewrite: None,
        }],
        ..ReflectionOutcome::default()
    });

    // The concurrent writer replaces the playbook wholesale.
    let interfering_store = PlaybookStore::new(&path);
    gateway.on_reflect(move || {
        let mut replaced = playbook_with(vec![keypoint(1, "entirely different", &["new"], 0)]);
        interfering_store.store(&mut replaced).unwrap();
    });

    let err = Reflector::new(&store, &gateway)
        .run(&turns(), Duration::from_secs(5))
        .unwrap_err();
    assert!(matches!(err, Error::ConcurrentUpdate));

    // The losing reflection left the concurrent state untouched.
    let playbook = store.load().unwrap();
    assert_eq!(playbook.key_points[0].text(), "entirely different");
    assert_eq!(playbook.key_points[0].score, 0);
}

#[test]
fn transcript_loading_feeds_reflection() {
    let dir = TempDir::new().unwrap();
    let path = write_transcript(
        dir.path(),
        &[
            ("user", "the payment gateway keeps timing out"),
            ("assistant", "Added exponential backoff to the retry loop."),
        ],
    );

    let turns = load_transcript(&path);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "the payment gateway keeps timing out");
}
