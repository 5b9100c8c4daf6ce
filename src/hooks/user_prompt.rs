//! Prompt-submit handler: inject relevant prior knowledge.

use super::{HookHandler, HookInput, SessionMarkers, context_response, empty_response};
use crate::llm::{LlmGateway, TagInference, TagRequest, heuristic_tag_inference};
use crate::models::load_transcript;
use crate::observability::DiagnosticSink;
use crate::selector::{Selected, SelectionRequest, Selector};
use crate::storage::{PlaybookLock, PlaybookStore};
use crate::templates::{TemplateKind, TemplateStore, render};
use crate::{Error, Result, TacitConfig};
use tracing::instrument;

/// Complexity at which the one-time task guidance is appended.
const COMPLEX_TASK_THRESHOLD: f64 = 0.7;

/// Handles `UserPromptSubmit` hook events.
///
/// Loads the playbook under a shared lock, infers tags and temperature for
/// the prompt, selects key points, and emits the injection payload. Never
/// writes the playbook.
pub struct UserPromptHandler {
    config: TacitConfig,
    gateway: Option<Box<dyn LlmGateway>>,
    markers: SessionMarkers,
    diagnostics: DiagnosticSink,
}

impl UserPromptHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(config: TacitConfig) -> Self {
        let markers = SessionMarkers::in_user_dir();
        let diagnostics = DiagnosticSink::new(&config.diagnostic_dir, config.diagnostic_mode);
        Self {
            config,
            gateway: None,
            markers,
            diagnostics,
        }
    }

    /// Sets the LLM gateway; without one the heuristic fallback is used.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Box<dyn LlmGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Overrides the session marker location (used by tests).
    #[must_use]
    pub fn with_markers(mut self, markers: SessionMarkers) -> Self {
        self.markers = markers;
        self
    }

    fn infer(&self, prompt: &str, input: &HookInput, existing_tags: Vec<String>) -> TagInference {
        let Some(gateway) = &self.gateway else {
            return heuristic_tag_inference(
                prompt,
                8,
                self.config.default_temperature,
            );
        };

        let recent_history = input
            .transcript_path
            .as_deref()
            .map(load_transcript)
            .unwrap_or_default();

        let request = TagRequest {
            prompt: prompt.to_string(),
            recent_history,
            existing_tags,
            max_tags: 8,
        };

        match gateway.infer_tags(&request, self.config.prompt_deadline) {
            Ok(inference) => inference,
            Err(e) => {
                tracing::warn!(error = %e, "tag inference failed, using heuristic fallback");
                heuristic_tag_inference(prompt, 8, self.config.default_temperature)
            },
        }
    }

    fn render_context(
        &self,
        selected: &[Selected],
        tags: &[String],
        complexity: f64,
        first_message: bool,
    ) -> String {
        let bullets: Vec<String> = selected
            .iter()
            .map(|s| {
                format!(
                    "- [score={}][tags={}] {}",
                    s.key_point.score,
                    s.key_point.tags.join(","),
                    s.key_point.text()
                )
            })
            .collect();

        let tags_text = if tags.is_empty() {
            "all topics".to_string()
        } else {
            tags.join(", ")
        };

        let templates = TemplateStore::with_dir(&self.config.template_dir);
        let mut context = render(
            &templates.get(TemplateKind::Playbook),
            &[
                ("key_points", &bullets.join("\n")),
                ("tags", &tags_text),
            ],
        );

        if first_message && complexity >= COMPLEX_TASK_THRESHOLD {
            context.push('\n');
            context.push_str(&render(
                &templates.get(TemplateKind::TaskGuidance),
                &[("complexity", &format!("{complexity:.1}"))],
            ));
        }

        context
    }
}

impl HookHandler for UserPromptHandler {
    fn event_type(&self) -> &'static str {
        "UserPromptSubmit"
    }

    #[instrument(skip(self, input), fields(hook = "UserPromptSubmit"))]
    fn handle(&self, input: &str) -> Result<String> {
        let input = HookInput::parse(input);
        let Some(prompt) = input.prompt.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Ok(empty_response());
        };

        let store = PlaybookStore::from_config(&self.config);
        let playbook = {
            let _lock = PlaybookLock::shared(store.path())?;
            match store.load() {
                Ok(playbook) => playbook,
                Err(Error::CorruptPlaybook { path, cause }) => {
                    // Injection degrades to "no context added".
                    tracing::error!(path = %path.display(), cause, "playbook unreadable");
                    return Ok(empty_response());
                },
                Err(other) => return Err(other),
            }
        };

        if playbook.is_empty() {
            tracing::debug!("playbook empty, nothing to inject");
            return Ok(empty_response());
        }

        let existing_tags: Vec<String> = playbook.all_tags().into_iter().collect();
        let inference = self.infer(prompt, &input, existing_tags);

        let selector =
            Selector::new().with_adaptive_temperature(self.config.adaptive_temperature);
        let selected = selector.select(
            &playbook,
            &SelectionRequest {
                prompt,
                prompt_tags: &inference.tags,
                temperature: inference.temperature,
                limit: self.config.selection_limit,
            },
        );

        if selected.is_empty() {
            return Ok(empty_response());
        }

        let session_id = input.session_id_or_unknown();
        let first_message = self.markers.is_first_message(session_id);
        if first_message {
            self.markers.mark(session_id);
        }

        let context =
            self.render_context(&selected, &inference.tags, inference.complexity, first_message);

        if self.diagnostics.is_enabled() {
            let names: Vec<&str> = selected
                .iter()
                .map(|s| s.key_point.name.as_str())
                .collect();
            let payload = serde_json::json!({
                "session_id": session_id,
                "tags": inference.tags,
                "temperature": inference.temperature,
                "selected": names,
                "context": context,
            });
            self.diagnostics.save(
                "user_prompt_inject",
                &serde_json::to_string_pretty(&payload).unwrap_or_default(),
            );
        }

        Ok(context_response(&context))
    }
}
