//! Cross-process playbook locking.
//!
//! A user-space mutex is not enough here: several host processes can fire
//! hooks for the same project at once. The lock is an advisory OS file lock
//! on a `.lock` sibling of the playbook, so lock acquisition never touches
//! the playbook file itself.

use crate::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Holds an advisory lock on the playbook for as long as it lives.
#[derive(Debug)]
pub struct PlaybookLock {
    file: File,
    path: PathBuf,
    exclusive: bool,
}

impl PlaybookLock {
    /// Acquires an exclusive lock, blocking until it is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the lock file cannot be created or locked.
    pub fn exclusive(playbook_path: &Path) -> Result<Self> {
        Self::acquire(playbook_path, true)
    }

    /// Acquires a shared lock, blocking until it is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the lock file cannot be created or locked.
    pub fn shared(playbook_path: &Path) -> Result<Self> {
        Self::acquire(playbook_path, false)
    }

    /// Returns whether this is an exclusive lock.
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(playbook_path: &Path, exclusive: bool) -> Result<Self> {
        let path = lock_path(playbook_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("create_lock_dir", &e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io("open_lock_file", &e))?;

        if exclusive {
            file.lock_exclusive()
                .map_err(|e| Error::io("lock_exclusive", &e))?;
        } else {
            file.lock_shared()
                .map_err(|e| Error::io("lock_shared", &e))?;
        }

        Ok(Self {
            file,
            path,
            exclusive,
        })
    }
}

impl Drop for PlaybookLock {
    fn drop(&mut self) {
        // Dropping the descriptor releases the lock anyway; unlocking
        // explicitly keeps the release prompt on platforms that defer it.
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// The lock file co-located with the playbook: `playbook.lock`.
fn lock_path(playbook_path: &Path) -> PathBuf {
    playbook_path.with_extension("lock")
}
