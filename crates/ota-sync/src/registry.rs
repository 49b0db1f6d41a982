//! In-memory registry of update records.
//!
//! The registry is owned by the background worker; nothing else mutates
//! it. Queries hand out copies.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::model::{UpdateRecord, UpdateStatus, MAX_PROGRESS};

struct Entry {
    record: UpdateRecord,
    /// Insertion order, used as the ordering tie-breaker
    seq: u64,
}

/// Authoritative set of update records, at most one per id.
#[derive(Default)]
pub struct UpdateRegistry {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl UpdateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a record or refresh the metadata of an existing one.
    ///
    /// For a known id only `name`, `version`, `timestamp`, `download_url`
    /// and `available_online` are taken from `record`; status, progress and
    /// local file survive so a routine refresh never resets a download.
    ///
    /// Returns whether the id was previously unseen.
    pub fn add_update(&mut self, record: UpdateRecord) -> bool {
        if let Some(entry) = self.entries.get_mut(&record.id) {
            let existing = &mut entry.record;
            existing.name = record.name;
            existing.version = record.version;
            existing.timestamp = record.timestamp;
            existing.download_url = record.download_url;
            existing.available_online = record.available_online;
            debug!(id = %existing.id, status = %existing.status, "Refreshed existing update");
            return false;
        }

        let mut record = record;
        if record.status == UpdateStatus::Unknown {
            record.status = UpdateStatus::Available;
        }
        info!(id = %record.id, version = %record.version, "Added new update");

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(record.id.clone(), Entry { record, seq });
        true
    }

    /// Mark every listed id as available online.
    ///
    /// With `replace_all_entries`, every other record is marked offline.
    /// Nothing is deleted; offline records keep their local state.
    pub fn set_updates_available_online(&mut self, ids: &[String], replace_all_entries: bool) {
        let online: HashSet<&str> = ids.iter().map(String::as_str).collect();
        for entry in self.entries.values_mut() {
            if online.contains(entry.record.id.as_str()) {
                entry.record.available_online = true;
            } else if replace_all_entries {
                if entry.record.available_online {
                    debug!(id = %entry.record.id, "Update no longer listed online");
                }
                entry.record.available_online = false;
            }
        }
    }

    /// Snapshot of every record, newest build first.
    ///
    /// Equal timestamps keep insertion order.
    pub fn get_updates(&self) -> Vec<UpdateRecord> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            b.record
                .timestamp
                .cmp(&a.record.timestamp)
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|e| e.record.clone()).collect()
    }

    pub fn get_update(&self, id: &str) -> Option<&UpdateRecord> {
        self.entries.get(id).map(|e| &e.record)
    }

    /// Remove a record and its downloaded package.
    ///
    /// The entry is always removed, even if the file cannot be deleted.
    pub fn delete_update(&mut self, id: &str) -> Option<UpdateRecord> {
        let entry = self.entries.remove(id)?;
        if let Some(path) = &entry.record.local_file_path {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(id, path = ?path, "Deleted update package"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(id, path = ?path, error = %e, "Could not delete update package"),
            }
        }
        info!(id, "Removed update");
        Some(entry.record)
    }

    /// Move a record to `next`.
    ///
    /// Returns `Ok(None)` for an unknown id. A transition outside the status
    /// machine is rejected and the previous status kept.
    pub fn set_status(
        &mut self,
        id: &str,
        next: UpdateStatus,
    ) -> Result<Option<UpdateStatus>, SyncError> {
        let Some(entry) = self.entries.get_mut(id) else {
            warn!(id, status = %next, "Status change for unknown update");
            return Ok(None);
        };
        let record = &mut entry.record;
        let current = record.status;

        if !current.can_transition_to(next) {
            warn!(id, from = %current, to = %next, "Rejected invalid status transition");
            return Err(SyncError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: next,
            });
        }

        match next {
            UpdateStatus::Starting => {
                record.download_progress = 0;
                record.install_progress = 0;
            }
            UpdateStatus::Installing => record.install_progress = 0,
            _ => {}
        }
        record.status = next;
        debug!(id, from = %current, to = %next, "Status changed");
        Ok(Some(next))
    }

    /// Record download progress; returns whether the value changed.
    ///
    /// Only accepted while the record is `DOWNLOADING`.
    pub fn set_download_progress(&mut self, id: &str, percent: u8) -> bool {
        match self.entries.get_mut(id) {
            Some(e) if e.record.status == UpdateStatus::Downloading => {
                advance(&mut e.record.download_progress, percent, id, "download")
            }
            Some(e) => {
                debug!(id, status = %e.record.status, percent, "Ignoring download progress");
                false
            }
            None => false,
        }
    }

    /// Record install progress; returns whether the value changed.
    ///
    /// Only accepted while the record is `INSTALLING`.
    pub fn set_install_progress(&mut self, id: &str, percent: u8) -> bool {
        match self.entries.get_mut(id) {
            Some(e) if e.record.status == UpdateStatus::Installing => {
                advance(&mut e.record.install_progress, percent, id, "install")
            }
            Some(e) => {
                debug!(id, status = %e.record.status, percent, "Ignoring install progress");
                false
            }
            None => false,
        }
    }

    /// Record where the downloaded package lives.
    pub fn set_local_file(&mut self, id: &str, path: Option<PathBuf>) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.record.local_file_path = path;
                true
            }
            None => false,
        }
    }
}

/// Monotonic progress update within one attempt.
fn advance(slot: &mut u8, percent: u8, id: &str, kind: &str) -> bool {
    if percent > MAX_PROGRESS {
        warn!(id, kind, percent, "Ignoring out-of-range progress");
        return false;
    }
    if percent <= *slot {
        return false;
    }
    *slot = percent;
    true
}
