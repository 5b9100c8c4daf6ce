//! Playbook persistence.
//!
//! One file, one writer at a time, crash-consistent: every store validates
//! the invariants, writes a temporary sibling, fsyncs, and atomically
//! renames over the live file. The previous live file survives as a
//! timestamped backup and `load` falls back to backups when the live file
//! is corrupt.

mod lock;

pub use lock::PlaybookLock;

use crate::models::{BodyShape, Playbook};
use crate::{Error, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Suffix given to backup files.
const BACKUP_SUFFIX: &str = "bak";

/// Identity of the on-disk playbook at a point in time.
///
/// Used to detect concurrent writers across the unlocked LLM window of a
/// reflection. The mtime check is cheap; the content digest catches writers
/// on filesystems with coarse timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    mtime: Option<SystemTime>,
    digest: Option<String>,
}

impl Fingerprint {
    /// Fingerprint of a missing file.
    #[must_use]
    pub const fn absent() -> Self {
        Self {
            mtime: None,
            digest: None,
        }
    }

    /// Returns true when the file existed at capture time.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.digest.is_some()
    }
}

/// A saved copy of the playbook used to bracket risky operations.
#[derive(Debug, Clone)]
pub struct PlaybookSnapshot {
    playbook: Playbook,
}

impl PlaybookSnapshot {
    /// Returns the saved playbook.
    #[must_use]
    pub fn playbook(&self) -> &Playbook {
        &self.playbook
    }

    /// Consumes the snapshot, yielding the saved playbook.
    #[must_use]
    pub fn into_playbook(self) -> Playbook {
        self.playbook
    }
}

/// Atomic reader/writer for the playbook file.
#[derive(Debug, Clone)]
pub struct PlaybookStore {
    path: PathBuf,
    backup_keep: usize,
    max_kpts: usize,
    prune_threshold: i64,
    canonical_shape: BodyShape,
}

impl PlaybookStore {
    /// Creates a store with default limits.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_keep: crate::config::DEFAULT_BACKUP_KEEP,
            max_kpts: crate::config::DEFAULT_MAX_KPTS,
            prune_threshold: crate::config::DEFAULT_PRUNE_THRESHOLD,
            canonical_shape: BodyShape::Legacy,
        }
    }

    /// Creates a store wired from configuration.
    #[must_use]
    pub fn from_config(config: &crate::TacitConfig) -> Self {
        Self::new(&config.playbook_path)
            .with_backup_keep(config.backup_keep)
            .with_limits(config.max_kpts, config.prune_threshold)
            .with_canonical_shape(config.canonical_shape)
    }

    /// Sets the number of backups retained.
    #[must_use]
    pub const fn with_backup_keep(mut self, keep: usize) -> Self {
        self.backup_keep = keep;
        self
    }

    /// Sets the size cap and prune threshold used during validation.
    #[must_use]
    pub const fn with_limits(mut self, max_kpts: usize, prune_threshold: i64) -> Self {
        self.max_kpts = max_kpts;
        self.prune_threshold = prune_threshold;
        self
    }

    /// Sets the canonical body shape written to disk.
    #[must_use]
    pub const fn with_canonical_shape(mut self, shape: BodyShape) -> Self {
        self.canonical_shape = shape;
        self
    }

    /// Returns the playbook path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the playbook.
    ///
    /// A missing file yields an empty playbook. A corrupt live file falls
    /// back to the most recent readable backup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPlaybook`] when the live file and every
    /// backup fail to parse.
    pub fn load(&self) -> Result<Playbook> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Playbook::empty());
            },
            Err(e) => return Err(Error::io("read_playbook", &e)),
        };

        match Playbook::from_json(&raw) {
            Ok(playbook) => Ok(playbook),
            Err(parse_err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %parse_err,
                    "live playbook unreadable, trying backups"
                );
                self.load_from_backups().ok_or(Error::CorruptPlaybook {
                    path: self.path.clone(),
                    cause: parse_err.to_string(),
                })
            },
        }
    }

    /// Validates and atomically writes the playbook.
    ///
    /// Dimensional attributes are clamped in place before validation, and
    /// `last_updated` is stamped on success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] when the playbook is
    /// structurally invalid (nothing is written), or [`Error::Io`] when the
    /// write itself fails (the live file is left untouched).
    pub fn store(&self, playbook: &mut Playbook) -> Result<()> {
        for kp in &mut playbook.key_points {
            kp.clamp_ranges();
        }
        self.validate(playbook)?;

        playbook.last_updated = Some(Utc::now());
        let json = playbook.to_json(self.canonical_shape)?;

        let parent = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&parent).map_err(|e| Error::io("create_playbook_dir", &e))?;

        self.backup_live_file()?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| Error::io("create_temp_playbook", &e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| Error::io("write_temp_playbook", &e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::io("sync_temp_playbook", &e))?;
        tmp.persist(&self.path).map_err(|e| Error::Io {
            operation: "persist_playbook".to_string(),
            cause: e.to_string(),
        })?;

        tracing::debug!(
            path = %self.path.display(),
            key_points = playbook.key_points.len(),
            "playbook stored"
        );
        Ok(())
    }

    /// Captures a rollback snapshot of a playbook.
    #[must_use]
    pub fn snapshot(playbook: &Playbook) -> PlaybookSnapshot {
        PlaybookSnapshot {
            playbook: playbook.clone(),
        }
    }

    /// Restores a snapshot, replacing the given playbook in memory.
    ///
    /// The on-disk file is deliberately untouched: a snapshot restore
    /// happens precisely when the failed operation was never written.
    pub fn restore(playbook: &mut Playbook, snapshot: PlaybookSnapshot) {
        *playbook = snapshot.into_playbook();
    }

    /// Captures the identity of the on-disk file for concurrent-update
    /// detection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] for any failure other than a missing file.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Fingerprint::absent());
            },
            Err(e) => return Err(Error::io("fingerprint_playbook", &e)),
        };

        let mtime = fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok();
        let digest = format!("{:x}", Sha256::digest(&bytes));

        Ok(Fingerprint {
            mtime,
            digest: Some(digest),
        })
    }

    /// Checks the §3 structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] naming the first failure.
    pub fn validate(&self, playbook: &Playbook) -> Result<()> {
        // Unique, dense names kpt_001..kpt_N.
        let mut indices = BTreeSet::new();
        for kp in &playbook.key_points {
            let Some(index) = kp.name.index() else {
                return Err(Error::InvariantViolation(format!(
                    "malformed key point name '{}'",
                    kp.name
                )));
            };
            if !indices.insert(index) {
                return Err(Error::InvariantViolation(format!(
                    "duplicate key point name '{}'",
                    kp.name
                )));
            }
        }
        let count = playbook.key_points.len();
        if !indices.is_empty() {
            let expected: BTreeSet<usize> = (1..=count).collect();
            if indices != expected {
                return Err(Error::InvariantViolation(format!(
                    "names are not the dense prefix kpt_001..kpt_{count:03}"
                )));
            }
        }

        // Stable region strictly precedes the pending region.
        let mut seen_pending = false;
        for kp in &playbook.key_points {
            if kp.pending {
                seen_pending = true;
            } else if seen_pending {
                return Err(Error::InvariantViolation(format!(
                    "stable key point '{}' appears after the pending region",
                    kp.name
                )));
            }
        }

        for kp in &playbook.key_points {
            if kp.body.is_empty() {
                return Err(Error::InvariantViolation(format!(
                    "key point '{}' has an empty statement",
                    kp.name
                )));
            }
            if kp.tags.is_empty() {
                return Err(Error::InvariantViolation(format!(
                    "key point '{}' has no tags",
                    kp.name
                )));
            }
            for tag in &kp.tags {
                if crate::tags::normalize_tag(tag).as_deref() != Some(tag.as_str()) {
                    return Err(Error::InvariantViolation(format!(
                        "key point '{}' carries unnormalized tag '{tag}'",
                        kp.name
                    )));
                }
            }
            if kp.score <= self.prune_threshold {
                return Err(Error::InvariantViolation(format!(
                    "key point '{}' has score {} at or below the prune threshold {}",
                    kp.name, kp.score, self.prune_threshold
                )));
            }
            if !(0.0..=1.0).contains(&kp.effect_rating) {
                return Err(Error::InvariantViolation(format!(
                    "key point '{}' effect_rating out of range",
                    kp.name
                )));
            }
            if !(-1.0..=0.0).contains(&kp.risk_level) {
                return Err(Error::InvariantViolation(format!(
                    "key point '{}' risk_level out of range",
                    kp.name
                )));
            }
            if !(0.0..=1.0).contains(&kp.innovation_level) {
                return Err(Error::InvariantViolation(format!(
                    "key point '{}' innovation_level out of range",
                    kp.name
                )));
            }
        }

        if count > self.max_kpts {
            return Err(Error::InvariantViolation(format!(
                "playbook holds {count} key points, cap is {}",
                self.max_kpts
            )));
        }

        Ok(())
    }

    /// Lists existing backups, newest first.
    #[must_use]
    pub fn backups(&self) -> Vec<PathBuf> {
        let Some(parent) = self.path.parent() else {
            return Vec::new();
        };
        let Some(stem) = self.path.file_name().and_then(|n| n.to_str()) else {
            return Vec::new();
        };
        let prefix = format!("{stem}.");

        let Ok(entries) = fs::read_dir(parent) else {
            return Vec::new();
        };

        let mut backups: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| {
                        name.starts_with(&prefix) && name.ends_with(BACKUP_SUFFIX)
                    })
            })
            .collect();

        // Backup names embed a sortable UTC timestamp.
        backups.sort();
        backups.reverse();
        backups
    }

    fn load_from_backups(&self) -> Option<Playbook> {
        for backup in self.backups() {
            if let Ok(raw) = fs::read_to_string(&backup) {
                if let Ok(playbook) = Playbook::from_json(&raw) {
                    tracing::warn!(backup = %backup.display(), "recovered playbook from backup");
                    return Some(playbook);
                }
            }
        }
        None
    }

    /// Copies the current live file to a timestamped backup and prunes old
    /// backups past `backup_keep`.
    fn backup_live_file(&self) -> Result<()> {
        if !self.path.exists() || self.backup_keep == 0 {
            return Ok(());
        }
        let Some(stem) = self.path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let backup = self
            .path
            .with_file_name(format!("{stem}.{timestamp}.{BACKUP_SUFFIX}"));
        fs::copy(&self.path, &backup).map_err(|e| Error::io("backup_playbook", &e))?;

        for stale in self.backups().into_iter().skip(self.backup_keep) {
            if let Err(e) = fs::remove_file(&stale) {
                tracing::debug!(path = %stale.display(), error = %e, "failed to prune backup");
            }
        }
        Ok(())
    }
}
