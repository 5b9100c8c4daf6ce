//! Pre-compact handler: reflect before the host compacts its context.

use super::session_end::run_reflection;
use super::{HookHandler, HookInput, SessionMarkers};
use crate::llm::LlmGateway;
use crate::{Result, TacitConfig};
use tracing::instrument;

/// Handles `PreCompact` hook events.
///
/// Same pipeline as session end but never gated by settings: compaction is
/// about to discard the transcript, so this is the last chance to learn
/// from it. Re-running on the same transcript is safe; duplicate lessons
/// are dropped by text during admission.
pub struct PreCompactHandler {
    config: TacitConfig,
    gateway: Option<Box<dyn LlmGateway>>,
    markers: SessionMarkers,
}

impl PreCompactHandler {
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
}

impl HookHandler for PreCompactHandler {
    fn event_type(&self) -> &'static str {
        "PreCompact"
    }

    #[instrument(skip(self, input), fields(hook = "PreCompact"))]
    fn handle(&self, input: &str) -> Result<String> {
        let input = HookInput::parse(input);
        run_reflection(&self.config, self.gateway.as_deref(), &input, &self.markers)
    }
}
