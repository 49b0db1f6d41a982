//! # ota-sync
//!
//! Client-side synchronization core of an over-the-air update manager.
//!
//! This crate handles:
//! - Fetching the remote update manifest and keeping a durable local copy
//!   that is only ever replaced atomically
//! - Merging manifests into a registry of update records without disturbing
//!   downloads or installs already in progress
//! - Tracking each record through the download, verify and install status
//!   machine as a background worker reports progress
//! - Routing status events to observers and remembering the watched record
//!   so a restarted session can resume where it left off
//! - Scheduling periodic checks and a retry after a failed automatic check
//!
//! ## Concurrency
//!
//! The [`UpdateRegistry`] is owned by a single background task
//! ([`UpdateWorker`]). The foreground talks to it through a
//! [`WorkerHandle`] and observes it through an ordered event channel
//! consumed by the [`EventRouter`]. Nothing shares mutable registry state.

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod manifest;
pub mod model;
pub mod prefs;
#[cfg(test)]
mod proptests;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod worker;

// Re-export main types for convenience
pub use config::{CheckInterval, CompatibilityConfig, LoggingConfig, SyncConfig};
pub use controller::{ConnectionState, RefreshOutcome, RefreshSignal, ResumedState, SessionController};
pub use error::SyncError;
pub use events::{EventRouter, StatusNotice, UpdateEvent, UpdateObserver};
pub use fetcher::{HttpTransport, ManifestFetcher, Transport};
pub use manifest::{ManifestSnapshot, UpdateDescriptor};
pub use model::{UpdateRecord, UpdateStatus, MAX_PROGRESS};
pub use prefs::{Preferences, SessionState};
pub use registry::UpdateRegistry;
pub use scheduler::{CheckScheduler, CheckTrigger, TokioScheduler};
pub use store::ManifestStore;
pub use worker::{InstallEngine, StatusReporter, UpdateWorker, WorkerHandle};
