//! Background owner of the update registry.
//!
//! ```text
//!  foreground                          background task
//! ┌──────────────┐   WorkerCommand    ┌───────────────────────┐
//! │ WorkerHandle │ ─────────────────> │ UpdateWorker          │
//! └──────────────┘   (mpsc+oneshot)   │   owns UpdateRegistry │
//!                                     │                       │
//! ┌──────────────┐   WorkerCommand    │                       │
//! │StatusReporter│ ─────────────────> │                       │
//! └──────▲───────┘                    └──────────┬────────────┘
//!        │ handed to                             │ UpdateEvent
//! ┌──────┴───────┐                               v (ordered)
//! │InstallEngine │                        EventRouter (foreground)
//! └──────────────┘
//! ```
//!
//! The registry is never shared. Every mutation is a command processed in
//! arrival order by one task, and every observable change is raised as an
//! [`UpdateEvent`] on a single ordered channel. Only a [`StatusReporter`]
//! can move a record through the status machine.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::events::UpdateEvent;
use crate::model::{UpdateRecord, UpdateStatus};
use crate::registry::UpdateRegistry;

/// Verification and installation engine.
///
/// Calls are made from the worker task and must not block; long-running work
/// is expected to run elsewhere and report back through the
/// [`StatusReporter`].
pub trait InstallEngine: Send + Sync {
    /// Start installing `record`, which is `VERIFIED` or
    /// `INSTALLATION_CANCELLED`.
    fn trigger_install(&self, record: UpdateRecord, reporter: StatusReporter);

    fn set_performance_mode(&self, enabled: bool);
}

enum WorkerCommand {
    AddUpdate {
        record: UpdateRecord,
        reply: oneshot::Sender<bool>,
    },
    SetAvailableOnline {
        ids: Vec<String>,
        replace_all_entries: bool,
        reply: oneshot::Sender<()>,
    },
    GetUpdates {
        reply: oneshot::Sender<Vec<UpdateRecord>>,
    },
    GetUpdate {
        id: String,
        reply: oneshot::Sender<Option<UpdateRecord>>,
    },
    DeleteUpdate {
        id: String,
        reply: oneshot::Sender<Option<UpdateRecord>>,
    },
    TriggerInstall {
        id: String,
        reply: oneshot::Sender<Result<bool, SyncError>>,
    },
    SetPerformanceMode {
        enabled: bool,
    },
    SetStatus {
        id: String,
        status: UpdateStatus,
        reply: oneshot::Sender<Result<bool, SyncError>>,
    },
    DownloadProgress {
        id: String,
        percent: u8,
    },
    InstallProgress {
        id: String,
        percent: u8,
    },
    SetLocalFile {
        id: String,
        path: Option<PathBuf>,
    },
    Shutdown,
}

async fn request<T>(
    commands: &mpsc::UnboundedSender<WorkerCommand>,
    build: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
) -> Result<T, SyncError> {
    let (reply, response) = oneshot::channel();
    commands
        .send(build(reply))
        .map_err(|_| SyncError::Disconnected)?;
    response.await.map_err(|_| SyncError::Disconnected)
}

/// Foreground connection to the worker.
///
/// Every call fails with [`SyncError::Disconnected`] once the worker has
/// stopped.
#[derive(Clone)]
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
}

impl WorkerHandle {
    pub fn is_connected(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Insert a record or refresh an existing one; returns whether it is new.
    pub async fn add_update(&self, record: UpdateRecord) -> Result<bool, SyncError> {
        request(&self.commands, |reply| WorkerCommand::AddUpdate { record, reply }).await
    }

    pub async fn set_updates_available_online(
        &self,
        ids: Vec<String>,
        replace_all_entries: bool,
    ) -> Result<(), SyncError> {
        request(&self.commands, |reply| WorkerCommand::SetAvailableOnline {
            ids,
            replace_all_entries,
            reply,
        })
        .await
    }

    /// Every record, newest first.
    pub async fn get_updates(&self) -> Result<Vec<UpdateRecord>, SyncError> {
        request(&self.commands, |reply| WorkerCommand::GetUpdates { reply }).await
    }

    pub async fn get_update(&self, id: &str) -> Result<Option<UpdateRecord>, SyncError> {
        let id = id.to_string();
        request(&self.commands, |reply| WorkerCommand::GetUpdate { id, reply }).await
    }

    pub async fn delete_update(&self, id: &str) -> Result<Option<UpdateRecord>, SyncError> {
        let id = id.to_string();
        request(&self.commands, |reply| WorkerCommand::DeleteUpdate { id, reply }).await
    }

    /// Hand a verified record to the install engine.
    ///
    /// Returns `Ok(false)` for an unknown id and `InvalidTransition` when the
    /// record is not ready to install.
    pub async fn trigger_install(&self, id: &str) -> Result<bool, SyncError> {
        let id = id.to_string();
        request(&self.commands, |reply| WorkerCommand::TriggerInstall { id, reply }).await?
    }

    pub fn set_performance_mode(&self, enabled: bool) -> Result<(), SyncError> {
        self.commands
            .send(WorkerCommand::SetPerformanceMode { enabled })
            .map_err(|_| SyncError::Disconnected)
    }

    /// Ask the worker to stop after the commands already queued.
    pub fn shutdown(&self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }
}

/// The only writer of record status, progress and local file.
#[derive(Clone)]
pub struct StatusReporter {
    commands: mpsc::UnboundedSender<WorkerCommand>,
}

impl StatusReporter {
    /// Move `id` to `status`.
    ///
    /// Returns `Ok(false)` for an unknown id. Transitions outside the status
    /// machine are rejected with `InvalidTransition` and leave the record
    /// unchanged.
    pub async fn set_status(&self, id: &str, status: UpdateStatus) -> Result<bool, SyncError> {
        let id = id.to_string();
        request(&self.commands, |reply| WorkerCommand::SetStatus { id, status, reply }).await?
    }

    pub fn set_download_progress(&self, id: &str, percent: u8) {
        let _ = self.commands.send(WorkerCommand::DownloadProgress {
            id: id.to_string(),
            percent,
        });
    }

    pub fn set_install_progress(&self, id: &str, percent: u8) {
        let _ = self.commands.send(WorkerCommand::InstallProgress {
            id: id.to_string(),
            percent,
        });
    }

    /// Record the downloaded package location; required before `DOWNLOADED`.
    pub fn set_local_file(&self, id: &str, path: Option<PathBuf>) {
        let _ = self.commands.send(WorkerCommand::SetLocalFile {
            id: id.to_string(),
            path,
        });
    }
}

/// Background task owning the [`UpdateRegistry`].
pub struct UpdateWorker {
    registry: UpdateRegistry,
    engine: Arc<dyn InstallEngine>,
    events: mpsc::UnboundedSender<UpdateEvent>,
    /// Used to mint reporters without keeping the worker alive on its own
    reporter_commands: mpsc::WeakUnboundedSender<WorkerCommand>,
}

impl UpdateWorker {
    /// Start a worker with an empty registry.
    pub fn spawn(
        engine: Arc<dyn InstallEngine>,
    ) -> (WorkerHandle, mpsc::UnboundedReceiver<UpdateEvent>, JoinHandle<()>) {
        Self::spawn_with_registry(UpdateRegistry::new(), engine)
    }

    /// Start a worker that takes ownership of `registry`.
    pub fn spawn_with_registry(
        registry: UpdateRegistry,
        engine: Arc<dyn InstallEngine>,
    ) -> (WorkerHandle, mpsc::UnboundedReceiver<UpdateEvent>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = Self {
            registry,
            engine,
            events: event_tx,
            reporter_commands: command_tx.downgrade(),
        };
        let task = tokio::spawn(worker.run(command_rx));

        (WorkerHandle { commands: command_tx }, event_rx, task)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
        info!(records = self.registry.len(), "Update worker started");
        while let Some(command) = commands.recv().await {
            if matches!(command, WorkerCommand::Shutdown) {
                break;
            }
            self.handle(command);
        }
        info!("Update worker stopped");
    }

    fn handle(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::AddUpdate { record, reply } => {
                let _ = reply.send(self.registry.add_update(record));
            }
            WorkerCommand::SetAvailableOnline {
                ids,
                replace_all_entries,
                reply,
            } => {
                self.registry
                    .set_updates_available_online(&ids, replace_all_entries);
                let _ = reply.send(());
            }
            WorkerCommand::GetUpdates { reply } => {
                let _ = reply.send(self.registry.get_updates());
            }
            WorkerCommand::GetUpdate { id, reply } => {
                let _ = reply.send(self.registry.get_update(&id).cloned());
            }
            WorkerCommand::DeleteUpdate { id, reply } => {
                let removed = self.registry.delete_update(&id);
                if removed.is_some() {
                    self.emit(UpdateEvent::Removed { id });
                }
                let _ = reply.send(removed);
            }
            WorkerCommand::TriggerInstall { id, reply } => {
                let _ = reply.send(self.trigger_install(&id));
            }
            WorkerCommand::SetPerformanceMode { enabled } => {
                debug!(enabled, "Install performance mode changed");
                self.engine.set_performance_mode(enabled);
            }
            WorkerCommand::SetStatus { id, status, reply } => {
                let _ = reply.send(self.set_status(id, status));
            }
            WorkerCommand::DownloadProgress { id, percent } => {
                if self.registry.set_download_progress(&id, percent) {
                    self.emit(UpdateEvent::DownloadProgress { id, percent });
                }
            }
            WorkerCommand::InstallProgress { id, percent } => {
                if self.registry.set_install_progress(&id, percent) {
                    self.emit(UpdateEvent::InstallProgress { id, percent });
                }
            }
            WorkerCommand::SetLocalFile { id, path } => {
                if !self.registry.set_local_file(&id, path) {
                    warn!(id = %id, "Local file reported for unknown update");
                }
            }
            WorkerCommand::Shutdown => {}
        }
    }

    fn set_status(&mut self, id: String, status: UpdateStatus) -> Result<bool, SyncError> {
        if status == UpdateStatus::Downloaded {
            if let Some(record) = self.registry.get_update(&id) {
                if !record.has_local_file() {
                    warn!(id = %id, "Download reported complete without a local file");
                    return Err(SyncError::InvalidTransition {
                        id,
                        from: record.status,
                        to: status,
                    });
                }
            }
        }

        match self.registry.set_status(&id, status)? {
            Some(status) => {
                self.emit(UpdateEvent::StatusChanged { id, status });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn trigger_install(&mut self, id: &str) -> Result<bool, SyncError> {
        let Some(record) = self.registry.get_update(id) else {
            warn!(id, "Install requested for unknown update");
            return Ok(false);
        };

        if !matches!(
            record.status,
            UpdateStatus::Verified | UpdateStatus::InstallationCancelled
        ) {
            warn!(id, status = %record.status, "Update is not ready to install");
            return Err(SyncError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to: UpdateStatus::Installing,
            });
        }

        let commands = self
            .reporter_commands
            .upgrade()
            .ok_or(SyncError::Disconnected)?;
        info!(id, "Starting installation");
        self.engine
            .trigger_install(record.clone(), StatusReporter { commands });
        Ok(true)
    }

    fn emit(&self, event: UpdateEvent) {
        if self.events.send(event).is_err() {
            debug!("No event consumer attached");
        }
    }
}
