//! End-to-end trigger scenarios against scripted LLM responses.

mod common;

use common::{ScriptedGateway, keypoint, playbook_with, write_transcript};
use tempfile::TempDir;

use tacit::hooks::{HookHandler, SessionEndHandler, SessionMarkers, UserPromptHandler};
use tacit::llm::{CandidateKeyPoint, KptDelta, KptRating, ReflectionOutcome};
use tacit::models::KeyPointName;
use tacit::storage::PlaybookStore;
use tacit::{Error, TacitConfig};

fn config_in(dir: &TempDir) -> TacitConfig {
    let mut config = TacitConfig::for_project(dir.path());
    config.update_on_exit = true;
    config.update_on_clear = true;
    config
}

fn markers_in(dir: &TempDir) -> SessionMarkers {
    SessionMarkers::new(dir.path().join("markers"))
}

fn candidate(text: &str, tags: &[&str]) -> CandidateKeyPoint {
    CandidateKeyPoint {
        text: text.to_string(),
        tags: tags.iter().map(ToString::to_string).collect(),
        effect_rating: None,
        risk_level: None,
        innovation_level: None,
    }
}

#[test]
fn cold_start_injects_nothing_and_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let gateway = ScriptedGateway::new().with_tags(&["payment", "retry", "backoff"], 0.2);
    let handler = UserPromptHandler::new(config_in(&dir))
        .with_gateway(Box::new(gateway))
        .with_markers(markers_in(&dir));

    let response = handler
        .handle(r#"{"session_id": "s1", "prompt": "fix the retry logic for the payment gateway"}"#)
        .unwrap();

    assert_eq!(response, "{}");
    assert!(!dir.path().join(".claude/playbook.json").exists());
}

#[test]
fn session_end_reflection_then_prompt_injection() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    // Session end: the transcript yields one new pending lesson.
    let transcript = write_transcript(
        dir.path(),
        &[
            ("user", "payment calls keep failing"),
            ("assistant", "Switched the retry loop to exponential backoff."),
        ],
    );
    let reflect_gateway = ScriptedGateway::new().with_outcome(ReflectionOutcome {
        new_key_points: vec![candidate(
            "Use exponential backoff for payment retries",
            &["payment", "retry", "backoff"],
        )],
        ..ReflectionOutcome::default()
    });
    let session_end = SessionEndHandler::new(config.clone())
        .with_gateway(Box::new(reflect_gateway))
        .with_markers(markers_in(&dir));

    let input = format!(
        r#"{{"session_id": "s1", "reason": "clear", "transcript_path": "{}"}}"#,
        transcript.display()
    );
    assert_eq!(session_end.handle(&input).unwrap(), "{}");

    let store = PlaybookStore::from_config(&config);
    let playbook = store.load().unwrap();
    assert_eq!(playbook.key_points.len(), 1);
    assert!(playbook.key_points[0].pending);

    // Pending items are not injected.
    let prompt_gateway = ScriptedGateway::new().with_tags(&["payment", "retry"], 0.2);
    let prompt_handler = UserPromptHandler::new(config.clone())
        .with_gateway(Box::new(prompt_gateway))
        .with_markers(markers_in(&dir));
    let response = prompt_handler
        .handle(r#"{"session_id": "s2", "prompt": "improve payment retries"}"#)
        .unwrap();
    assert_eq!(response, "{}");

    // A second reflection corroborates the lesson; promotion makes it
    // injectable.
    let promote_gateway = ScriptedGateway::new().with_outcome(ReflectionOutcome {
        deltas: vec![KptDelta {
            name: KeyPointName::from_index(1),
            rating: KptRating::Helpful,
            tag_additions: vec![],
            text_rewrite: None,
        }],
        promotions: vec![KeyPointName::from_index(1)],
        ..ReflectionOutcome::default()
    });
    let session_end = SessionEndHandler::new(config.clone())
        .with_gateway(Box::new(promote_gateway))
        .with_markers(markers_in(&dir));
    session_end.handle(&input).unwrap();

    let response = prompt_handler
        .handle(r#"{"session_id": "s3", "prompt": "improve payment retries"}"#)
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();
    let context = parsed["hookSpecificOutput"]["additionalContext"]
        .as_str()
        .unwrap();
    assert!(context.contains("exponential backoff"));
    assert!(context.contains("Relevant prior knowledge"));
}

#[test]
fn failing_gateway_degrades_to_heuristic_injection() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let store = PlaybookStore::from_config(&config);
    let mut playbook = playbook_with(vec![keypoint(
        1,
        "Use exponential backoff for payment retries",
        &["payment", "retry"],
        3,
    )]);
    store.store(&mut playbook).unwrap();

    // A gateway with nothing scripted fails every call; the handler must
    // still inject via the local heuristic.
    let handler = UserPromptHandler::new(config)
        .with_gateway(Box::new(ScriptedGateway::new()))
        .with_markers(markers_in(&dir));

    let response = handler
        .handle(r#"{"session_id": "s1", "prompt": "payment retry fixes"}"#)
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert!(parsed["hookSpecificOutput"]["additionalContext"]
        .as_str()
        .unwrap()
        .contains("exponential backoff"));
}

#[test]
fn failing_reflection_surfaces_transport_error() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let transcript = write_transcript(dir.path(), &[("user", "hello"), ("assistant", "hi")]);

    let handler = SessionEndHandler::new(config.clone())
        .with_gateway(Box::new(ScriptedGateway::new()))
        .with_markers(markers_in(&dir));

    let input = format!(
        r#"{{"session_id": "s1", "reason": "clear", "transcript_path": "{}"}}"#,
        transcript.display()
    );
    let err = handler.handle(&input).unwrap_err();
    assert!(matches!(err, Error::LlmTransport { .. }));

    // The playbook was never created: reflection failed before any write.
    assert!(!config.playbook_path.exists());
}

#[test]
fn session_end_respects_disabled_reasons() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.update_on_exit = false;

    let transcript = write_transcript(dir.path(), &[("user", "hello"), ("assistant", "hi")]);
    let gateway = ScriptedGateway::new().with_outcome(ReflectionOutcome {
        new_key_points: vec![candidate("should never be stored", &["nope"])],
        ..ReflectionOutcome::default()
    });
    let handler = SessionEndHandler::new(config.clone())
        .with_gateway(Box::new(gateway))
        .with_markers(markers_in(&dir));

    let input = format!(
        r#"{{"session_id": "s1", "reason": "prompt_input_exit", "transcript_path": "{}"}}"#,
        transcript.display()
    );
    assert_eq!(handler.handle(&input).unwrap(), "{}");
    assert!(!config.playbook_path.exists());
}

#[test]
fn first_message_marks_session_once() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let store = PlaybookStore::from_config(&config);
    let mut playbook = playbook_with(vec![keypoint(1, "payment lesson", &["payment"], 3)]);
    store.store(&mut playbook).unwrap();

    let markers = markers_in(&dir);
    let handler = UserPromptHandler::new(config)
        .with_gateway(Box::new(
            ScriptedGateway::new().with_tags(&["payment"], 0.5),
        ))
        .with_markers(markers.clone());

    assert!(markers.is_first_message("s9"));
    handler
        .handle(r#"{"session_id": "s9", "prompt": "payment work"}"#)
        .unwrap();
    assert!(!markers.is_first_message("s9"));
}
