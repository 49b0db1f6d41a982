//! Status event routing.
//!
//! The background worker raises [`UpdateEvent`]s on an ordered channel. The
//! [`EventRouter`] is the single foreground consumer: it records the latest
//! known state of the focused record in the persisted [`SessionState`]
//! first, then fans the event out to every registered [`UpdateObserver`] in
//! the order the worker raised it.
//!
//! Delivery is at-least-once. Observers must tolerate seeing the same status
//! twice.
//!
//! [`SessionState`]: crate::prefs::SessionState

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::model::UpdateStatus;
use crate::prefs::{Preferences, SessionState};

/// Event raised by the background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    StatusChanged { id: String, status: UpdateStatus },
    DownloadProgress { id: String, percent: u8 },
    InstallProgress { id: String, percent: u8 },
    Removed { id: String },
}

impl UpdateEvent {
    /// Id of the record the event is about.
    pub fn id(&self) -> &str {
        match self {
            Self::StatusChanged { id, .. }
            | Self::DownloadProgress { id, .. }
            | Self::InstallProgress { id, .. }
            | Self::Removed { id } => id,
        }
    }

    /// Status the event implies for its record, if any.
    pub fn implied_status(&self) -> Option<UpdateStatus> {
        match self {
            Self::StatusChanged { status, .. } => Some(*status),
            Self::DownloadProgress { .. } => Some(UpdateStatus::Downloading),
            Self::InstallProgress { .. } => Some(UpdateStatus::Installing),
            Self::Removed { .. } => None,
        }
    }
}

/// Receives routed events. Every method defaults to a no-op.
pub trait UpdateObserver: Send + Sync {
    fn on_status_changed(&self, _id: &str, _status: UpdateStatus) {}

    fn on_download_progress(&self, _id: &str, _percent: u8) {}

    fn on_install_progress(&self, _id: &str, _percent: u8) {}

    fn on_removed(&self, _id: &str) {}
}

/// User-facing notice for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusNotice {
    DownloadFailed,
    VerificationFailed,
    DownloadVerified,
    InstallationComplete,
    InstallationFailed,
}

impl StatusNotice {
    /// Notice to show when a record enters `status`, if any.
    pub fn for_status(status: UpdateStatus) -> Option<Self> {
        match status {
            UpdateStatus::PausedError => Some(Self::DownloadFailed),
            UpdateStatus::VerificationFailed => Some(Self::VerificationFailed),
            UpdateStatus::Verified => Some(Self::DownloadVerified),
            UpdateStatus::Installed => Some(Self::InstallationComplete),
            UpdateStatus::InstallationFailed => Some(Self::InstallationFailed),
            _ => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::DownloadFailed => "Download failed",
            Self::VerificationFailed => "Update verification failed",
            Self::DownloadVerified => "Update verified, ready to install",
            Self::InstallationComplete => "Installation complete, reboot to apply",
            Self::InstallationFailed => "Installation failed",
        }
    }
}

/// Single dispatch point for worker events.
pub struct EventRouter {
    prefs: Arc<Preferences>,
    observers: RwLock<Vec<Arc<dyn UpdateObserver>>>,
    /// Record the user is currently watching
    focused: RwLock<Option<String>>,
}

impl EventRouter {
    pub fn new(prefs: Arc<Preferences>) -> Self {
        Self {
            prefs,
            observers: RwLock::new(Vec::new()),
            focused: RwLock::new(None),
        }
    }

    /// Register an observer; it sees every event routed afterwards.
    pub async fn subscribe(&self, observer: Arc<dyn UpdateObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Change the focused record.
    pub async fn focus(&self, id: Option<String>) {
        debug!(?id, "Focused record changed");
        *self.focused.write().await = id;
    }

    pub async fn focused(&self) -> Option<String> {
        self.focused.read().await.clone()
    }

    /// Route events until the worker side of the channel closes.
    pub async fn run(&self, mut events: UnboundedReceiver<UpdateEvent>) {
        while let Some(event) = events.recv().await {
            self.route(event).await;
        }
        info!("Event channel closed, router stopped");
    }

    /// Persist session state for `event`, then notify observers.
    pub async fn route(&self, event: UpdateEvent) {
        match &event {
            UpdateEvent::Removed { id } => self.forget(id).await,
            other => {
                if let Some(status) = other.implied_status() {
                    self.remember(other.id(), status).await;
                }
            }
        }

        let observers = self.observers.read().await.clone();
        for observer in observers {
            match &event {
                UpdateEvent::StatusChanged { id, status } => observer.on_status_changed(id, *status),
                UpdateEvent::DownloadProgress { id, percent } => {
                    observer.on_download_progress(id, *percent)
                }
                UpdateEvent::InstallProgress { id, percent } => {
                    observer.on_install_progress(id, *percent)
                }
                UpdateEvent::Removed { id } => observer.on_removed(id),
            }
        }
    }

    /// Record the latest status of the focused record.
    ///
    /// With nothing focused, the record the event is about becomes focused.
    async fn remember(&self, id: &str, status: UpdateStatus) {
        {
            let mut focused = self.focused.write().await;
            match focused.as_deref() {
                Some(current) if current != id => return,
                Some(_) => {}
                None => *focused = Some(id.to_string()),
            }
        }

        let state = SessionState::new(id, status);
        if self.prefs.session_state().await == state {
            return;
        }
        if let Err(e) = self.prefs.set_session_state(state).await {
            warn!(id, error = %e, "Could not persist session state");
        }
    }

    async fn forget(&self, id: &str) {
        {
            let mut focused = self.focused.write().await;
            if focused.as_deref() == Some(id) {
                *focused = None;
            }
        }

        if self.prefs.session_state().await.active_id.as_deref() == Some(id) {
            if let Err(e) = self.prefs.set_session_state(SessionState::default()).await {
                warn!(id, error = %e, "Could not clear session state");
            }
        }
    }
}
