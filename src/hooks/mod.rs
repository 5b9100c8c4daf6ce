//! Trigger handlers for the host assistant's hook events.
//!
//! Three thin entry points orchestrate the selector or reflector around
//! storage. Handlers are re-entrant; serialization happens on the playbook
//! lock, not in here. Errors never escape the CLI boundary: the `hook`
//! command swallows them into a no-op response and a diagnostic record.

mod pre_compact;
mod session_end;
mod session_marker;
mod user_prompt;

pub use pre_compact::PreCompactHandler;
pub use session_end::SessionEndHandler;
pub use session_marker::SessionMarkers;
pub use user_prompt::UserPromptHandler;

use crate::Result;
use serde::Deserialize;
use std::path::PathBuf;

/// Trait for hook handlers.
pub trait HookHandler {
    /// The hook event type this handler processes.
    fn event_type(&self) -> &'static str;

    /// Handles the hook event; input and output are the host's JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if handling fails; the CLI boundary converts any
    /// error into a no-op response.
    fn handle(&self, input: &str) -> Result<String>;
}

/// Parsed hook input common to all events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    /// The host session identifier.
    #[serde(default)]
    pub session_id: Option<String>,
    /// The pending user prompt (prompt-submit only).
    #[serde(default)]
    pub prompt: Option<String>,
    /// Path to the session transcript.
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
    /// Why the hook fired (session-end only, e.g. `clear`).
    #[serde(default)]
    pub reason: Option<String>,
}

impl HookInput {
    /// Parses hook input leniently: malformed JSON becomes empty input.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        serde_json::from_str(input).unwrap_or_default()
    }

    /// The session id or a placeholder.
    #[must_use]
    pub fn session_id_or_unknown(&self) -> &str {
        self.session_id.as_deref().unwrap_or("unknown")
    }
}

/// The empty no-op hook response.
#[must_use]
pub fn empty_response() -> String {
    "{}".to_string()
}

/// Builds the prompt-submit response carrying injected context.
#[must_use]
pub fn context_response(context: &str) -> String {
    serde_json::json!({
        "hookSpecificOutput": {
            "hookEventName": "UserPromptSubmit",
            "additionalContext": context,
        }
    })
    .to_string()
}
