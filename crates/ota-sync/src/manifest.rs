//! Update manifest parsing.
//!
//! The manifest served by the update server is a JSON document of the form
//!
//! ```json
//! {
//!   "response": [
//!     {
//!       "id": "5eb63bbbe01eeed093cb22bb8f5acdc3",
//!       "filename": "rom-14.0-20240101-NIGHTLY-device.zip",
//!       "version": "14.0",
//!       "datetime": 1704067200,
//!       "size": 1073741824,
//!       "url": "https://updates.example.org/rom.zip",
//!       "romtype": "nightly"
//!     }
//!   ]
//! }
//! ```
//!
//! A document that cannot be read as a whole is a parse error. A single
//! malformed descriptor is skipped so one bad entry cannot hide every other
//! update.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CompatibilityConfig;
use crate::error::SyncError;

/// One raw update entry as published in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    pub id: String,
    pub filename: String,
    pub version: String,
    /// Build time in unix seconds
    pub datetime: i64,
    /// Package size in bytes
    pub size: u64,
    pub url: String,
    #[serde(default)]
    pub romtype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    response: Vec<serde_json::Value>,
}

/// Descriptors parsed from one fetch, in manifest order.
///
/// Immutable once built; consumed by a single merge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestSnapshot {
    descriptors: Vec<UpdateDescriptor>,
}

impl ManifestSnapshot {
    /// Build a snapshot directly from descriptors.
    pub fn new(descriptors: Vec<UpdateDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Parse a manifest document, keeping only compatible descriptors.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ParseError` if the document is not JSON or has no
    /// `response` array.
    pub fn parse(data: &[u8], compat: &CompatibilityConfig) -> Result<Self, SyncError> {
        let document: ManifestDocument =
            serde_json::from_slice(data).map_err(|e| SyncError::ParseError(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(document.response.len());

        for (index, value) in document.response.into_iter().enumerate() {
            let descriptor: UpdateDescriptor = match serde_json::from_value(value) {
                Ok(d) => d,
                Err(e) => {
                    warn!(index, error = %e, "Skipping malformed update descriptor");
                    continue;
                }
            };

            if descriptor.id.trim().is_empty() {
                warn!(index, "Skipping update descriptor without id");
                continue;
            }

            if !compat.is_compatible(&descriptor) {
                debug!(id = %descriptor.id, "Skipping incompatible update");
                continue;
            }

            if !seen.insert(descriptor.id.clone()) {
                warn!(id = %descriptor.id, "Duplicate update id in manifest, keeping first");
                continue;
            }

            descriptors.push(descriptor);
        }

        Ok(Self { descriptors })
    }

    /// Descriptors in manifest order.
    pub fn descriptors(&self) -> &[UpdateDescriptor] {
        &self.descriptors
    }

    /// Consume the snapshot.
    pub fn into_descriptors(self) -> Vec<UpdateDescriptor> {
        self.descriptors
    }

    /// Ids of every listed update, in manifest order.
    pub fn ids(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Whether this snapshot lists any id that `older` did not.
    ///
    /// Removals alone do not count as new content.
    pub fn has_new_entries_since(&self, older: &ManifestSnapshot) -> bool {
        let known: HashSet<&str> = older.descriptors.iter().map(|d| d.id.as_str()).collect();
        self.descriptors.iter().any(|d| !known.contains(d.id.as_str()))
    }
}

impl CompatibilityConfig {
    /// Whether a descriptor may be offered on this device.
    pub fn is_compatible(&self, descriptor: &UpdateDescriptor) -> bool {
        if let Some(installed) = self.installed_build_timestamp {
            if !self.allow_downgrading && descriptor.datetime <= installed {
                return false;
            }
        }

        if let Some(wanted) = &self.release_type {
            match &descriptor.romtype {
                Some(romtype) if romtype.eq_ignore_ascii_case(wanted) => {}
                _ => return false,
            }
        }

        true
    }
}

#[cfg(test)]
pub(crate) fn manifest_json(entries: &[(&str, i64)]) -> String {
    let response: Vec<serde_json::Value> = entries
        .iter()
        .map(|(id, ts)| {
            serde_json::json!({
                "id": id,
                "filename": format!("{}.zip", id),
                "version": "14.0",
                "datetime": ts,
                "size": 1024,
                "url": format!("https://example.com/{}.zip", id),
                "romtype": "nightly",
            })
        })
        .collect();
    serde_json::json!({ "response": response }).to_string()
}
