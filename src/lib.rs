//! # Tacit
//!
//! A per-project playbook of tacit knowledge for AI coding assistants.
//!
//! Tacit maintains an evolving, scored, tagged corpus of short key points
//! extracted from prior coding sessions and injects the most relevant subset
//! into each new user prompt. The host assistant drives it through three
//! hook events (prompt submission, session end, context compaction); tacit
//! reads the transcript, consults a language model for tagging and
//! reflection, and rewrites the playbook on disk atomically.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tacit::{PlaybookStore, SelectionRequest, Selector};
//!
//! let store = PlaybookStore::new(".claude/playbook.json");
//! let playbook = store.load()?;
//! let selected = Selector::new().select(&playbook, &SelectionRequest {
//!     prompt: "fix the retry logic",
//!     prompt_tags: &["retry".to_string()],
//!     temperature: 0.2,
//!     limit: 6,
//! });
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use std::error::Error as StdError;
use std::fmt;

// Module declarations
pub mod config;
pub mod hooks;
pub mod llm;
pub mod models;
pub mod observability;
pub mod reflector;
pub mod security;
pub mod selector;
pub mod storage;
pub mod tags;
pub mod templates;

// Re-exports for convenience
pub use config::TacitConfig;
pub use llm::LlmGateway;
pub use models::{KeyPoint, KeyPointBody, KeyPointName, Playbook, Turn};
pub use reflector::Reflector;
pub use selector::{SelectionRequest, Selector};
pub use storage::PlaybookStore;

/// Error type for tacit operations.
#[derive(Debug)]
pub enum Error {
    /// The playbook file and all of its backups are unreadable.
    CorruptPlaybook {
        /// Path of the playbook that failed to load.
        path: std::path::PathBuf,
        /// The underlying cause.
        cause: String,
    },
    /// A playbook violated a structural invariant and was not written.
    InvariantViolation(String),
    /// The LLM endpoint could not be reached or returned a server error.
    LlmTransport {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
    /// The LLM reply did not match the expected JSON schema.
    LlmSchema {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
    /// An operation exceeded its deadline.
    Timeout {
        /// The operation that timed out.
        operation: String,
    },
    /// The playbook changed underneath a reflection and the result could
    /// not be rebased onto the newer state.
    ConcurrentUpdate,
    /// A reflection produced a playbook that failed validation; the
    /// snapshot was restored and nothing was written.
    ReflectionRejected {
        /// The invariant that failed.
        invariant: String,
    },
    /// A filesystem operation failed.
    Io {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
    /// Invalid input was provided.
    InvalidInput(String),
}

impl Error {
    /// Wraps an I/O error with the name of the failing operation.
    pub fn io(operation: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            cause: err.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptPlaybook { path, cause } => {
                write!(f, "corrupt playbook at {}: {cause}", path.display())
            },
            Self::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            Self::LlmTransport { operation, cause } => {
                write!(f, "llm transport error in '{operation}': {cause}")
            },
            Self::LlmSchema { operation, cause } => {
                write!(f, "llm schema error in '{operation}': {cause}")
            },
            Self::Timeout { operation } => write!(f, "operation '{operation}' timed out"),
            Self::ConcurrentUpdate => {
                write!(f, "playbook changed concurrently; reflection discarded")
            },
            Self::ReflectionRejected { invariant } => {
                write!(f, "reflection rejected: {invariant}")
            },
            Self::Io { operation, cause } => {
                write!(f, "i/o error in '{operation}': {cause}")
            },
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl StdError for Error {}

/// Result type alias for tacit operations.
pub type Result<T> = std::result::Result<T, Error>;
