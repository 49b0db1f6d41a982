//! Durable manifest cache.
//!
//! The cache file is either absent or a complete manifest that was
//! previously fetched, parsed and merged. New content is always written to a
//! sibling temp file first and only renamed over the canonical path by
//! [`ManifestStore::commit`].

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CompatibilityConfig;
use crate::error::SyncError;
use crate::manifest::ManifestSnapshot;

/// Atomic read/write access to the last accepted manifest.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    /// Canonical cache path
    path: PathBuf,
    /// Filter applied whenever a manifest is parsed
    compat: CompatibilityConfig,
}

impl ManifestStore {
    pub fn new(path: PathBuf, compat: CompatibilityConfig) -> Self {
        Self { path, compat }
    }

    /// Canonical cache path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a committed manifest exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// A fresh temp path next to the cache file.
    ///
    /// Lives in the same directory so the final rename never crosses
    /// filesystems.
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", Uuid::new_v4()));
        self.path.with_file_name(name)
    }

    /// A fresh temp path whose directory is known to exist.
    ///
    /// Transports only write to the path they are given, so the cache
    /// directory is created here on first use.
    pub fn prepare_temp_path(&self) -> Result<PathBuf, SyncError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(self.temp_path())
    }

    /// Read and parse the committed manifest.
    ///
    /// Returns `Ok(None)` when nothing has been committed yet. A corrupt file
    /// is a `ParseError`, never an empty manifest.
    pub fn read_cached(&self) -> Result<Option<ManifestSnapshot>, SyncError> {
        match fs::read(&self.path) {
            Ok(data) => ManifestSnapshot::parse(&data, &self.compat).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse a manifest at an arbitrary path (a freshly fetched temp file).
    pub fn parse_file(&self, path: &Path) -> Result<ManifestSnapshot, SyncError> {
        let data = fs::read(path)?;
        ManifestSnapshot::parse(&data, &self.compat)
    }

    /// Atomically replace the cache with `temp_path`.
    ///
    /// The temp file is flushed to disk before the rename and the parent
    /// directory afterwards, so an interrupted commit leaves either the old
    /// or the new manifest in place.
    pub fn commit(&self, temp_path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        File::open(temp_path)?.sync_all()?;
        fs::rename(temp_path, &self.path)?;

        #[cfg(unix)]
        {
            if let Some(parent) = self.path.parent() {
                if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
                    warn!(error = %e, "Could not sync manifest cache directory");
                }
            }
        }

        info!(path = ?self.path, "Committed manifest cache");
        Ok(())
    }

    /// Remove a temp file that will not be committed.
    pub fn discard(&self, temp_path: &Path) {
        remove_temp(temp_path);
    }
}

/// Removes a temp file on drop unless it was kept.
///
/// Covers futures dropped mid-fetch, which never reach their own cleanup.
pub(crate) struct TempFileGuard<'a> {
    path: &'a Path,
    keep: bool,
}

impl<'a> TempFileGuard<'a> {
    pub(crate) fn new(path: &'a Path) -> Self {
        Self { path, keep: false }
    }

    pub(crate) fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for TempFileGuard<'_> {
    fn drop(&mut self) {
        if !self.keep {
            remove_temp(self.path);
        }
    }
}

fn remove_temp(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = ?path, "Discarded manifest temp file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Could not remove manifest temp file"),
    }
}
