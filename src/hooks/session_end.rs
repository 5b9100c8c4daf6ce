//! Session-end handler: reflect on the transcript and update the playbook.

use super::{HookHandler, HookInput, SessionMarkers, empty_response};
use crate::llm::LlmGateway;
use crate::models::load_transcript;
use crate::observability::DiagnosticSink;
use crate::reflector::{ApplyLimits, ReflectionStats, Reflector};
use crate::storage::PlaybookStore;
use crate::tags::TagStatistics;
use crate::{Result, TacitConfig};
use tracing::instrument;

/// Hook reason reported for a normal session exit.
const REASON_EXIT: &str = "prompt_input_exit";
/// Hook reason reported when the user clears the conversation.
const REASON_CLEAR: &str = "clear";

/// Handles `SessionEnd` hook events.
///
/// Reflection on normal exit and on clear are individually opt-in via
/// `update_on_exit` / `update_on_clear`.
pub struct SessionEndHandler {
    config: TacitConfig,
    gateway: Option<Box<dyn LlmGateway>>,
    markers: SessionMarkers,
}

impl SessionEndHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(config: TacitConfig) -> Self {
        Self {
            config,
            gateway: None,
            markers: SessionMarkers::in_user_dir(),
        }
    }

    /// Sets the LLM gateway; without one the handler is a no-op.
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

    /// Whether configuration allows reflection for this hook reason.
    fn reason_allowed(&self, reason: Option<&str>) -> bool {
        match reason {
            Some(REASON_EXIT) => self.config.update_on_exit,
            Some(REASON_CLEAR) => self.config.update_on_clear,
            // Unknown reasons (and hosts that send none) reflect.
            _ => true,
        }
    }
}

impl HookHandler for SessionEndHandler {
    fn event_type(&self) -> &'static str {
        "SessionEnd"
    }

    #[instrument(skip(self, input), fields(hook = "SessionEnd"))]
    fn handle(&self, input: &str) -> Result<String> {
        let input = HookInput::parse(input);
        if !self.reason_allowed(input.reason.as_deref()) {
            tracing::debug!(reason = ?input.reason, "reflection disabled for this reason");
            return Ok(empty_response());
        }
        run_reflection(&self.config, self.gateway.as_deref(), &input, &self.markers)
    }
}

/// Shared reflection path for session-end and pre-compact.
pub(super) fn run_reflection(
    config: &TacitConfig,
    gateway: Option<&dyn LlmGateway>,
    input: &HookInput,
    markers: &SessionMarkers,
) -> Result<String> {
    let Some(gateway) = gateway else {
        tracing::debug!("no LLM gateway configured, skipping reflection");
        return Ok(empty_response());
    };

    let turns = input
        .transcript_path
        .as_deref()
        .map(load_transcript)
        .unwrap_or_default();
    if turns.is_empty() {
        tracing::debug!("empty transcript, skipping reflection");
        return Ok(empty_response());
    }

    let store = PlaybookStore::from_config(config);
    let reflector = Reflector::new(&store, gateway).with_limits(ApplyLimits {
        merge_threshold: config.merge_threshold,
        prune_threshold: config.prune_threshold,
        max_kpts: config.max_kpts,
    });

    let stats = reflector.run(&turns, config.reflect_deadline)?;
    record_stats(config, &stats);
    markers.clear();

    tracing::info!(
        added = stats.added,
        rated = stats.rated,
        merged = stats.merged,
        promoted = stats.promoted,
        pruned = stats.pruned,
        evicted = stats.evicted,
        total = stats.total,
        "reflection complete"
    );
    Ok(empty_response())
}

/// Updates tag usage statistics and the diagnostic summary.
fn record_stats(config: &TacitConfig, stats: &ReflectionStats) {
    if !stats.new_tags.is_empty() {
        let mut tag_stats = TagStatistics::load(&config.diagnostic_dir);
        tag_stats.record(&stats.new_tags);
        if let Err(e) = tag_stats.save(&config.diagnostic_dir) {
            tracing::debug!(error = %e, "failed to persist tag statistics");
        }
    }

    let sink = DiagnosticSink::new(&config.diagnostic_dir, config.diagnostic_mode);
    if sink.is_enabled() {
        let payload = serde_json::json!({
            "added": stats.added,
            "rated": stats.rated,
            "merged": stats.merged,
            "promoted": stats.promoted,
            "pruned": stats.pruned,
            "evicted": stats.evicted,
            "total": stats.total,
        });
        sink.save(
            "reflection_stats",
            &serde_json::to_string_pretty(&payload).unwrap_or_default(),
        );
    }
}
