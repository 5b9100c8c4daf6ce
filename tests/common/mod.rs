//! Shared test fixtures: a deterministic scripted LLM gateway.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tacit::llm::{
    LlmGateway, MigrationDecision, ReflectionOutcome, ReflectionRequest, TagInference, TagRequest,
};
use tacit::models::{KeyPoint, KeyPointBody, KeyPointName, Playbook};
use tacit::{Error, Result};

/// A gateway that replays scripted responses, in order.
///
/// LLM nondeterminism is the main threat to property tests, so every
/// LLM-dependent path is exercised against this fake instead.
pub struct ScriptedGateway {
    tag_response: Mutex<Option<TagInference>>,
    outcomes: Mutex<VecDeque<ReflectionOutcome>>,
    migration: Mutex<Option<MigrationDecision>>,
    /// Invoked at the start of every `reflect` call, outside any lock the
    /// reflector holds. Lets tests mutate the playbook mid-reflection.
    #[allow(clippy::type_complexity)]
    on_reflect: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            tag_response: Mutex::new(None),
            outcomes: Mutex::new(VecDeque::new()),
            migration: Mutex::new(None),
            on_reflect: Mutex::new(None),
        }
    }

    pub fn with_tags(self, tags: &[&str], temperature: f64) -> Self {
        *self.tag_response.lock().unwrap() = Some(TagInference {
            tags: tags.iter().map(ToString::to_string).collect(),
            temperature,
            complexity: 0.2,
        });
        self
    }

    pub fn push_outcome(&self, outcome: ReflectionOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn with_outcome(self, outcome: ReflectionOutcome) -> Self {
        self.push_outcome(outcome);
        self
    }

    pub fn with_migration(self, decision: MigrationDecision) -> Self {
        *self.migration.lock().unwrap() = Some(decision);
        self
    }

    pub fn on_reflect(&self, hook: impl FnMut() + Send + 'static) {
        *self.on_reflect.lock().unwrap() = Some(Box::new(hook));
    }
}

impl LlmGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer_tags(&self, _request: &TagRequest, _budget: Duration) -> Result<TagInference> {
        self.tag_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::LlmTransport {
                operation: "infer_tags".to_string(),
                cause: "no scripted tag response".to_string(),
            })
    }

    fn reflect(&self, _request: &ReflectionRequest, _budget: Duration) -> Result<ReflectionOutcome> {
        if let Some(hook) = self.on_reflect.lock().unwrap().as_mut() {
            hook();
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::LlmTransport {
                operation: "reflect".to_string(),
                cause: "no scripted reflection outcome".to_string(),
            })
    }

    fn migrate_to_when_do(&self, _kpt: &KeyPoint, _budget: Duration) -> Result<MigrationDecision> {
        self.migration
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::LlmTransport {
                operation: "migrate".to_string(),
                cause: "no scripted migration decision".to_string(),
            })
    }
}

/// Builds a stable key point with the given tags and score.
pub fn keypoint(index: usize, text: &str, tags: &[&str], score: i64) -> KeyPoint {
    let mut kp = KeyPoint::new(
        KeyPointName::from_index(index),
        KeyPointBody::legacy(text.to_string()),
    );
    kp.tags = tags.iter().map(ToString::to_string).collect();
    kp.score = score;
    kp
}

/// Builds a playbook from key points.
pub fn playbook_with(kps: Vec<KeyPoint>) -> Playbook {
    Playbook {
        key_points: kps,
        ..Playbook::empty()
    }
}

/// Writes a minimal host-format transcript and returns its path.
pub fn write_transcript(dir: &std::path::Path, turns: &[(&str, &str)]) -> std::path::PathBuf {
    let path = dir.join("transcript.jsonl");
    let mut lines = Vec::new();
    for (role, content) in turns {
        lines.push(
            serde_json::json!({
                "type": role,
                "message": {"role": role, "content": content}
            })
            .to_string(),
        );
    }
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}
