//! Tag usage statistics.
//!
//! A small counter file kept next to the diagnostics so that tag drift is
//! observable across reflections. Losing it is harmless; it is rebuilt as
//! reflections run.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-tag usage counters.
#[derive(Debug, Clone, Default)]
pub struct TagStatistics {
    counts: BTreeMap<String, u64>,
}

impl TagStatistics {
    /// File name of the statistics document.
    pub const FILE_NAME: &'static str = "tag_statistics.json";

    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads statistics from the given directory, returning empty counters
    /// when the file is absent or unreadable.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let path = Self::path_in(dir);
        let Ok(raw) = fs::read_to_string(&path) else {
            return Self::default();
        };
        serde_json::from_str::<BTreeMap<String, u64>>(&raw)
            .map(|counts| Self { counts })
            .unwrap_or_default()
    }

    /// Persists statistics into the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::io("create_stats_dir", &e))?;
        let json = serde_json::to_string_pretty(&self.counts)
            .map_err(|e| Error::InvalidInput(format!("stats serialize: {e}")))?;
        fs::write(Self::path_in(dir), json).map_err(|e| Error::io("write_stats", &e))
    }

    /// Records one use of each given tag.
    pub fn record<S: AsRef<str>>(&mut self, tags: &[S]) {
        for tag in tags {
            *self.counts.entry(tag.as_ref().to_string()).or_insert(0) += 1;
        }
    }

    /// Returns the count for a tag.
    #[must_use]
    pub fn count(&self, tag: &str) -> u64 {
        self.counts.get(tag).copied().unwrap_or(0)
    }

    /// Number of distinct tags tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true when no tags are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn path_in(dir: &Path) -> PathBuf {
        dir.join(Self::FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_count() {
        let mut stats = TagStatistics::new();
        stats.record(&["payment", "retry"]);
        stats.record(&["payment"]);
        assert_eq!(stats.count("payment"), 2);
        assert_eq!(stats.count("retry"), 1);
        assert_eq!(stats.count("unknown"), 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut stats = TagStatistics::new();
        stats.record(&["testing", "testing", "deploy"]);
        stats.save(dir.path()).unwrap();

        let reloaded = TagStatistics::load(dir.path());
        assert_eq!(reloaded.count("testing"), 2);
        assert_eq!(reloaded.count("deploy"), 1);
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let stats = TagStatistics::load(dir.path());
        assert!(stats.is_empty());
    }
}
