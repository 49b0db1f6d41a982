//! Console collaborators for the sync core.

use ota_sync::{InstallEngine, StatusNotice, StatusReporter, UpdateObserver, UpdateRecord, UpdateStatus};
use tracing::{debug, info, warn};

/// Install engine for a host without an installer attached.
///
/// Requests are logged and left alone; the record stays `VERIFIED`.
#[derive(Debug, Default)]
pub struct LoggingEngine;

impl InstallEngine for LoggingEngine {
    fn trigger_install(&self, record: UpdateRecord, _reporter: StatusReporter) {
        warn!(id = %record.id, version = %record.version, "No installer attached, install request ignored");
    }

    fn set_performance_mode(&self, enabled: bool) {
        debug!(enabled, "Performance mode request ignored");
    }
}

/// Prints user notices for routed events.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl UpdateObserver for ConsoleObserver {
    fn on_status_changed(&self, id: &str, status: UpdateStatus) {
        info!(id, status = %status, "Update status changed");
        if let Some(notice) = StatusNotice::for_status(status) {
            println!("{id}: {}", notice.message());
        }
    }

    fn on_download_progress(&self, id: &str, percent: u8) {
        debug!(id, percent, "Download progress");
    }

    fn on_install_progress(&self, id: &str, percent: u8) {
        debug!(id, percent, "Install progress");
    }

    fn on_removed(&self, id: &str) {
        info!(id, "Update removed");
    }
}
