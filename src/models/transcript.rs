//! Conversation transcript loading.
//!
//! The host writes transcripts as JSON Lines; each entry wraps a message
//! with a role and either a plain string or a list of typed content blocks.
//! Meta entries, command output, and non-conversational rows are filtered
//! out before reflection sees the transcript.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Conversation roles that participate in reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// The coding assistant.
    Assistant,
}

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who spoke.
    pub role: Role,
    /// What was said, flattened to plain text.
    pub content: String,
}

impl Turn {
    /// Creates a user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One JSONL row of the host transcript format.
#[derive(Debug, Deserialize)]
struct TranscriptEntry {
    #[serde(rename = "type")]
    entry_type: Option<String>,
    #[serde(rename = "isMeta", default)]
    is_meta: bool,
    #[serde(rename = "isVisibleInTranscriptOnly", default)]
    transcript_only: bool,
    message: Option<TranscriptMessage>,
}

#[derive(Debug, Deserialize)]
struct TranscriptMessage {
    role: Option<String>,
    content: Option<serde_json::Value>,
}

/// Loads and filters a transcript file.
///
/// Returns an empty list when the path is absent or unreadable; a missing
/// transcript is never an error at the trigger boundary. Individual
/// malformed lines are skipped.
#[must_use]
pub fn load_transcript(path: &Path) -> Vec<Turn> {
    let Ok(file) = File::open(path) else {
        tracing::debug!(path = %path.display(), "transcript not readable, treating as empty");
        return Vec::new();
    };

    let mut turns = Vec::new();
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<TranscriptEntry>(&line) else {
            continue;
        };
        if let Some(turn) = turn_from_entry(entry) {
            turns.push(turn);
        }
    }
    turns
}

fn turn_from_entry(entry: TranscriptEntry) -> Option<Turn> {
    let role = match entry.entry_type.as_deref() {
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        _ => return None,
    };
    if entry.is_meta || entry.transcript_only {
        return None;
    }

    let message = entry.message?;
    // The wrapper role wins only when the inner role is absent.
    let role = match message.role.as_deref() {
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        Some(_) => return None,
        None => role,
    };

    let content = flatten_content(message.content?)?;
    if content.is_empty() {
        return None;
    }
    // Slash-command echoes are host bookkeeping, not conversation.
    if content.contains("<command-name>") || content.contains("<local-command-stdout>") {
        return None;
    }

    Some(Turn { role, content })
}

fn flatten_content(content: serde_json::Value) -> Option<String> {
    match content {
        serde_json::Value::String(text) => Some(text),
        serde_json::Value::Array(blocks) => {
            let parts: Vec<String> = blocks
                .into_iter()
                .filter_map(|block| {
                    let obj = block.as_object()?;
                    if obj.get("type").and_then(serde_json::Value::as_str) == Some("text") {
                        obj.get("text")
                            .and_then(serde_json::Value::as_str)
                            .map(ToString::to_string)
                    } else {
                        None
                    }
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_lines(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_load_plain_and_block_content() {
        let file = write_lines(&[
            r#"{"type":"user","message":{"role":"user","content":"fix the retry logic"}}"#,
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Using exponential backoff."},{"type":"tool_use","name":"edit"}]}}"#,
        ]);

        let turns = load_transcript(file.path());
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], Turn::user("fix the retry logic"));
        assert_eq!(turns[1], Turn::assistant("Using exponential backoff."));
    }

    #[test]
    fn test_meta_and_command_rows_filtered() {
        let file = write_lines(&[
            r#"{"type":"user","isMeta":true,"message":{"role":"user","content":"meta"}}"#,
            r#"{"type":"user","message":{"role":"user","content":"<command-name>status</command-name>"}}"#,
            r#"{"type":"summary","message":{"role":"user","content":"summary row"}}"#,
            r#"{"type":"user","message":{"role":"user","content":"real question"}}"#,
        ]);

        let turns = load_transcript(file.path());
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "real question");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let file = write_lines(&[
            "not json at all",
            r#"{"type":"user","message":{"role":"user","content":"still works"}}"#,
        ]);

        let turns = load_transcript(file.path());
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let turns = load_transcript(Path::new("/nonexistent/transcript.jsonl"));
        assert!(turns.is_empty());
    }
}
