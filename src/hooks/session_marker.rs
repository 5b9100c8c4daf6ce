//! Session first-message markers.
//!
//! A marker file per session records that the session already received its
//! one-time task guidance. Markers live outside the playbook directory so
//! the prompt-submit handler can write them without ever touching the
//! playbook file. Reflection clears them.

use std::fs;
use std::path::PathBuf;

/// Manages per-session marker files in a directory.
#[derive(Debug, Clone)]
pub struct SessionMarkers {
    dir: PathBuf,
}

impl SessionMarkers {
    /// Creates a marker store in the given directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the marker store in the user's host config directory
    /// (`CLAUDE_CONFIG_DIR` or `~/.claude`).
    #[must_use]
    pub fn in_user_dir() -> Self {
        let dir = std::env::var("CLAUDE_CONFIG_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map_or_else(
                || {
                    std::env::var("HOME").map_or_else(
                        |_| PathBuf::from(".claude"),
                        |home| PathBuf::from(home).join(".claude"),
                    )
                },
                PathBuf::from,
            );
        Self::new(dir)
    }

    /// True when this session has not been marked yet.
    #[must_use]
    pub fn is_first_message(&self, session_id: &str) -> bool {
        !self.marker_path(session_id).exists()
    }

    /// Marks the session as having received its first message.
    pub fn mark(&self, session_id: &str) {
        if fs::create_dir_all(&self.dir).is_ok() {
            let _ = fs::write(self.marker_path(session_id), b"");
        }
    }

    /// Removes all session markers.
    pub fn clear(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.filter_map(std::result::Result::ok) {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') && name.ends_with("_first_message") {
                let _ = fs::remove_file(entry.path());
            }
        }
    }

    fn marker_path(&self, session_id: &str) -> PathBuf {
        // Dots and slashes in a session id must not escape the directory.
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!(".{safe}_first_message"))
    }
}
