//! Owned temporary files and directories.
//!
//! ## Why track paths instead of holding `NamedTempFile`s?
//!
//! Uploads and scratch files outlive the function that creates them: an
//! upload is written by the HTTP handler, consumed by the dispatcher on the
//! blocking pool, and deleted there. A `NamedTempFile` would delete itself on
//! the wrong thread at the wrong time. The manager instead allocates names
//! through [`tempfile::Builder`], immediately takes ownership of the path, and
//! remembers it in a set. A path leaves the set exactly when the manager has
//! deleted it (or found it already gone).
//!
//! ## Concurrency
//!
//! The owned set sits behind a `Mutex` that is only held for membership
//! updates. File-system removal happens outside the lock, so a sweep of a large
//! directory never blocks a request registering its upload. Every removal
//! treats `NotFound` as success: a path that disappears between the sweep's
//! check and its delete is already clean.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Default name prefix for entries the manager creates.
pub const DEFAULT_PREFIX: &str = "converter_";

/// Tracks and deletes the files and directories it owns.
#[derive(Debug)]
pub struct TempResourceManager {
    root: PathBuf,
    prefix: String,
    owned: Mutex<HashSet<PathBuf>>,
}

impl TempResourceManager {
    /// Create a manager that allocates entries under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            owned: Mutex::new(HashSet::new()),
        }
    }

    /// Create a manager rooted at the system temp directory.
    pub fn in_system_temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a uniquely named empty file ending in `suffix` and own it.
    pub fn create_file(&self, suffix: &str) -> io::Result<PathBuf> {
        let temp = tempfile::Builder::new()
            .prefix(&self.prefix)
            .suffix(suffix)
            .tempfile_in(&self.root)?;
        let path = temp
            .into_temp_path()
            .keep()
            .map_err(|e| e.error)?;
        self.track(path.clone());
        debug!("Created temp file {}", path.display());
        Ok(path)
    }

    /// Allocate a uniquely named directory starting with `prefix` and own it.
    pub fn create_dir(&self, prefix: &str) -> io::Result<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}", self.prefix, prefix))
            .tempdir_in(&self.root)?;
        #[allow(deprecated)]
        let path = dir.into_path();
        self.track(path.clone());
        debug!("Created temp dir {}", path.display());
        Ok(path)
    }

    /// Take ownership of a path created elsewhere (a stored upload).
    pub fn adopt(&self, path: impl Into<PathBuf>) {
        self.track(path.into());
    }

    pub fn is_owned(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn owned_count(&self) -> usize {
        self.lock().len()
    }

    /// Remove an owned path.
    ///
    /// Returns `false` for paths the manager does not own (they are left
    /// alone) and for removals that failed. An owned path is untracked either
    /// way; a path that no longer exists counts as cleaned.
    pub fn cleanup(&self, path: &Path) -> bool {
        if !self.lock().remove(path) {
            return false;
        }
        match remove_path(path) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to remove {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Remove every owned path whose modification time is older than `max_age`.
    ///
    /// Owned paths that no longer exist are untracked without being counted.
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;

        for path in self.snapshot() {
            let modified = match std::fs::symlink_metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    self.untrack(&path);
                    continue;
                }
                Err(e) => {
                    warn!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }
            // Someone else may have cleaned it since the snapshot.
            if !self.is_owned(&path) {
                continue;
            }
            match remove_path(&path) {
                Ok(true) => {
                    self.untrack(&path);
                    removed += 1;
                }
                Ok(false) => self.untrack(&path),
                Err(e) => warn!("Failed to sweep {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            debug!("Swept {} expired temp entries", removed);
        }
        removed
    }

    /// Remove every owned path. Failures are logged and swallowed.
    pub fn sweep_all(&self) -> usize {
        let paths: Vec<PathBuf> = self.lock().drain().collect();
        let mut removed = 0;
        for path in paths {
            match remove_path(&path) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to remove {} during sweep: {}", path.display(), e),
            }
        }
        removed
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        // A panic while holding this lock cannot leave the set half-updated.
        self.owned.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, path: PathBuf) {
        self.lock().insert(path);
    }

    fn untrack(&self, path: &Path) {
        self.lock().remove(path);
    }

    fn snapshot(&self) -> Vec<PathBuf> {
        self.lock().iter().cloned().collect()
    }
}

impl Drop for TempResourceManager {
    fn drop(&mut self) {
        let leftover = self.sweep_all();
        if leftover > 0 {
            debug!("Removed {} temp entries on drop", leftover);
        }
    }
}

/// Remove a file or directory tree.
///
/// `Ok(true)` when something was removed, `Ok(false)` when nothing existed.
pub(crate) fn remove_path(path: &Path) -> io::Result<bool> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove entries directly inside `dir` older than `max_age`.
///
/// Used for the download directory, whose artifacts are not owned by any
/// manager. Returns the count removed; a missing directory counts as empty.
pub fn sweep_directory(dir: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Cannot read {}: {}", dir.display(), e);
            }
            return 0;
        }
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if now.duration_since(modified).unwrap_or(Duration::ZERO) <= max_age {
            continue;
        }
        match remove_path(&path) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!("Failed to sweep {}: {}", path.display(), e),
        }
    }
    removed
}
