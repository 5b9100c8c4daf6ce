//! Diagnostic file sink.
//!
//! When diagnostic mode is on, prompt/response exchanges and structured
//! error records are written as timestamped files under the project's
//! diagnostic directory. Content is passed through the secret redactor
//! before it touches disk.

use crate::security::redact_secrets;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes timestamped diagnostic files, or nothing when disabled.
#[derive(Debug, Clone)]
pub struct DiagnosticSink {
    dir: PathBuf,
    enabled: bool,
}

impl DiagnosticSink {
    /// Creates a sink rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
        }
    }

    /// Creates a disabled sink.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    /// Returns whether the sink writes anything.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the diagnostic directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves redacted content under `<timestamp>_<name>.txt`.
    ///
    /// Failures are logged and swallowed; diagnostics must never break a
    /// hook.
    pub fn save(&self, name: &str, content: &str) {
        if !self.enabled {
            return;
        }
        if let Err(e) = fs::create_dir_all(&self.dir) {
            tracing::warn!(error = %e, "failed to create diagnostic directory");
            return;
        }
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let path = self.dir.join(format!("{timestamp}_{name}.txt"));
        if let Err(e) = fs::write(&path, redact_secrets(content)) {
            tracing::warn!(error = %e, path = %path.display(), "failed to write diagnostic");
        }
    }

    /// Saves a structured error record for a failed hook invocation.
    pub fn save_error(&self, hook: &str, error: &crate::Error) {
        let record = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "hook": hook,
            "error_kind": error_kind(error),
            "message": error.to_string(),
        });
        let body = serde_json::to_string_pretty(&record).unwrap_or_else(|_| record.to_string());
        self.save(&format!("{hook}_error"), &body);
    }
}

fn error_kind(error: &crate::Error) -> &'static str {
    match error {
        crate::Error::CorruptPlaybook { .. } => "corrupt_playbook",
        crate::Error::InvariantViolation(_) => "invariant_violation",
        crate::Error::LlmTransport { .. } => "llm_transport",
        crate::Error::LlmSchema { .. } => "llm_schema",
        crate::Error::Timeout { .. } => "timeout",
        crate::Error::ConcurrentUpdate => "concurrent_update",
        crate::Error::ReflectionRejected { .. } => "reflection_rejected",
        crate::Error::Io { .. } => "io",
        crate::Error::InvalidInput(_) => "invalid_input",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_disabled_sink_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let sink = DiagnosticSink::new(dir.path(), false);
        sink.save("test", "content");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_save_redacts_secrets() {
        let dir = TempDir::new().unwrap();
        let sink = DiagnosticSink::new(dir.path(), true);
        sink.save(
            "exchange",
            "calling with sk-ant-REDACTED",
        );

        let entry = fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap();
        let content = fs::read_to_string(entry.path()).unwrap();
        assert!(!content.contains("sk-ant-"));
        assert!(content.contains("[REDACTED]"));
    }

    #[test]
    fn test_save_error_record_shape() {
        let dir = TempDir::new().unwrap();
        let sink = DiagnosticSink::new(dir.path(), true);
        sink.save_error("session_end", &crate::Error::ConcurrentUpdate);

        let entry = fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap();
        let content = fs::read_to_string(entry.path()).unwrap();
        let record: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(record["hook"], "session_end");
        assert_eq!(record["error_kind"], "concurrent_update");
    }
}
