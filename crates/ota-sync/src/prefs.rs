//! Persisted preferences.
//!
//! A small JSON key/value document holding the last successful check time,
//! the periodic check interval chosen by the user, and the [`SessionState`]
//! used to resume the UI after a restart. Written through a temp file and
//! rename so a crash never leaves a truncated document.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::CheckInterval;
use crate::error::SyncError;
use crate::model::UpdateStatus;

/// Last known state of the record the user was watching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub active_id: Option<String>,
    pub active_status_name: Option<String>,
}

impl SessionState {
    pub fn new(id: impl Into<String>, status: UpdateStatus) -> Self {
        Self {
            active_id: Some(id.into()),
            active_status_name: Some(status.name().to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active_id.is_none()
    }

    /// Parsed status; `None` if absent or written by an unknown version.
    pub fn status(&self) -> Option<UpdateStatus> {
        self.active_status_name.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PreferencesData {
    #[serde(default)]
    last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    check_interval: Option<CheckInterval>,
    #[serde(default)]
    session: SessionState,
}

/// Durable preferences shared by the controller and the event router.
pub struct Preferences {
    path: PathBuf,
    data: RwLock<PreferencesData>,
}

impl Preferences {
    /// Load preferences from `path`.
    ///
    /// A missing file yields defaults. An unreadable document is logged and
    /// replaced by defaults on the next write.
    pub fn load(path: PathBuf) -> Result<Self, SyncError> {
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Discarding corrupt preferences");
                    PreferencesData::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = ?path, "No preferences found, using defaults");
                PreferencesData::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time of the last successful manifest check.
    pub async fn last_check(&self) -> Option<DateTime<Utc>> {
        self.data.read().await.last_check
    }

    pub async fn set_last_check(&self, at: DateTime<Utc>) -> Result<(), SyncError> {
        self.update(|data| data.last_check = Some(at)).await
    }

    /// Interval picked by the user, if any.
    pub async fn check_interval(&self) -> Option<CheckInterval> {
        self.data.read().await.check_interval
    }

    pub async fn set_check_interval(&self, interval: CheckInterval) -> Result<(), SyncError> {
        self.update(|data| data.check_interval = Some(interval)).await
    }

    pub async fn session_state(&self) -> SessionState {
        self.data.read().await.session.clone()
    }

    pub async fn set_session_state(&self, state: SessionState) -> Result<(), SyncError> {
        self.update(|data| data.session = state).await
    }

    /// Return the stored session state and clear it.
    pub async fn take_session_state(&self) -> Result<SessionState, SyncError> {
        self.update(|data| std::mem::take(&mut data.session)).await
    }

    /// Apply `change` to a copy, persist it, then publish it.
    ///
    /// On a failed write memory keeps matching the file on disk.
    async fn update<R>(
        &self,
        change: impl FnOnce(&mut PreferencesData) -> R,
    ) -> Result<R, SyncError> {
        let mut data = self.data.write().await;
        let mut next = data.clone();
        let result = change(&mut next);
        self.persist(&next)?;
        *data = next;
        Ok(result)
    }

    fn persist(&self, data: &PreferencesData) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(data)?;
        let temp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
