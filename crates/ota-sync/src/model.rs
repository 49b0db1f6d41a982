//! Update records and the per-record status machine.
//!
//! # Status machine
//!
//! ```text
//! UNKNOWN -> AVAILABLE -> STARTING -> DOWNLOADING <-> PAUSED
//!                                      |    \           |
//!                                      |     +--> PAUSED_ERROR
//!                                      v
//!                DOWNLOADED -> VERIFYING -> VERIFIED | VERIFICATION_FAILED
//!                                             |
//!                                             v
//!                INSTALLING -> INSTALLED | INSTALLATION_FAILED | INSTALLATION_CANCELLED
//! ```
//!
//! `PAUSED_ERROR`, `VERIFICATION_FAILED`, `INSTALLATION_FAILED` and
//! `INSTALLED` end an attempt; a fresh attempt restarts at `STARTING`.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::manifest::UpdateDescriptor;

/// Upper bound for download and install progress.
pub const MAX_PROGRESS: u8 = 100;

/// Lifecycle status of a single update record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    Unknown,
    Available,
    Starting,
    Downloading,
    Paused,
    PausedError,
    Downloaded,
    Verifying,
    Verified,
    VerificationFailed,
    Installing,
    Installed,
    InstallationFailed,
    InstallationCancelled,
}

impl Default for UpdateStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl UpdateStatus {
    pub const ALL: [UpdateStatus; 14] = [
        Self::Unknown,
        Self::Available,
        Self::Starting,
        Self::Downloading,
        Self::Paused,
        Self::PausedError,
        Self::Downloaded,
        Self::Verifying,
        Self::Verified,
        Self::VerificationFailed,
        Self::Installing,
        Self::Installed,
        Self::InstallationFailed,
        Self::InstallationCancelled,
    ];

    /// Stable name used for persistence (`activeStatusName`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Available => "AVAILABLE",
            Self::Starting => "STARTING",
            Self::Downloading => "DOWNLOADING",
            Self::Paused => "PAUSED",
            Self::PausedError => "PAUSED_ERROR",
            Self::Downloaded => "DOWNLOADED",
            Self::Verifying => "VERIFYING",
            Self::Verified => "VERIFIED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::Installing => "INSTALLING",
            Self::Installed => "INSTALLED",
            Self::InstallationFailed => "INSTALLATION_FAILED",
            Self::InstallationCancelled => "INSTALLATION_CANCELLED",
        }
    }

    /// Whether `self -> next` is an edge of the status machine.
    pub fn can_transition_to(&self, next: UpdateStatus) -> bool {
        use UpdateStatus::*;
        matches!(
            (*self, next),
            (Unknown, Available)
                | (Available, Starting)
                | (Starting, Downloading)
                | (Starting, PausedError)
                | (Downloading, Paused)
                | (Downloading, Downloaded)
                | (Downloading, PausedError)
                | (Paused, Downloading)
                | (Paused, PausedError)
                | (Downloaded, Verifying)
                | (Verifying, Verified)
                | (Verifying, VerificationFailed)
                | (Verified, Installing)
                | (Installing, Installed)
                | (Installing, InstallationFailed)
                | (Installing, InstallationCancelled)
                | (InstallationCancelled, Installing)
                | (PausedError, Starting)
                | (VerificationFailed, Starting)
                | (InstallationFailed, Starting)
                | (Installed, Starting)
        )
    }

    /// Whether this status ends the current attempt.
    pub fn is_attempt_terminal(&self) -> bool {
        matches!(
            self,
            Self::PausedError | Self::VerificationFailed | Self::InstallationFailed | Self::Installed
        )
    }

    /// Whether a download or install is actively running.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Downloading | Self::Verifying | Self::Installing
        )
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UpdateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.name() == s)
            .ok_or_else(|| format!("unknown update status: {}", s))
    }
}

/// One tracked update build.
///
/// `status`, the progress counters and `local_file_path` belong to the
/// background worker; the foreground only ever sees copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Stable identifier of the build, never reused
    pub id: String,
    /// Display name (package file name)
    pub name: String,
    /// Version string as published
    pub version: String,
    /// Build time in unix seconds, used for ordering
    pub timestamp: i64,
    /// Package size in bytes
    pub file_size: u64,
    /// Where the package can be downloaded from
    pub download_url: String,
    /// Release type (nightly, weekly, ...) if the manifest carries one
    #[serde(default)]
    pub release_type: Option<String>,
    pub status: UpdateStatus,
    pub download_progress: u8,
    pub install_progress: u8,
    /// Present only once a full package exists on disk
    pub local_file_path: Option<PathBuf>,
    /// True while the latest fetched manifest lists this id
    pub available_online: bool,
}

impl UpdateRecord {
    /// Create a record in its pre-merge state.
    pub fn new(id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            version: String::new(),
            timestamp,
            file_size: 0,
            download_url: String::new(),
            release_type: None,
            status: UpdateStatus::Unknown,
            download_progress: 0,
            install_progress: 0,
            local_file_path: None,
            available_online: false,
        }
    }

    /// Build a record for a descriptor listed in a freshly fetched manifest.
    pub fn from_descriptor(descriptor: &UpdateDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            name: descriptor.filename.clone(),
            version: descriptor.version.clone(),
            timestamp: descriptor.datetime,
            file_size: descriptor.size,
            download_url: descriptor.url.clone(),
            release_type: descriptor.romtype.clone(),
            status: UpdateStatus::Unknown,
            download_progress: 0,
            install_progress: 0,
            local_file_path: None,
            available_online: true,
        }
    }

    /// Whether the package is present on disk.
    pub fn has_local_file(&self) -> bool {
        self.local_file_path.is_some()
    }
}
