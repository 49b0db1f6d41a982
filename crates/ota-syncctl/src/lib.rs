//! ota-syncctl - CLI for the OTA update sync core
//!
//! This crate provides a command-line interface for:
//! - Checking the update server for new builds
//! - Listing known updates and their status
//! - Inspecting and changing the periodic check schedule
//! - Watching for updates in the foreground

pub mod cli;
pub mod config;
pub mod engine;
pub mod output;

pub use cli::Cli;
pub use config::CliOverrides;
pub use output::{JsonResponse, OutputFormat, OutputFormatter};

use ota_sync::SyncError;

/// Exit codes for CLI operations
///
/// Exit codes provide machine-readable status for scripting:
/// - 0: Success
/// - 1: General error
/// - 2: Check failed - the server could not be reached or sent a bad manifest
/// - 3: Busy - another check is still running
/// - 4: Cancelled
/// - 5: Invalid input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    CheckFailed = 2,
    Busy = 3,
    Cancelled = 4,
    InvalidInput = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&SyncError> for ExitCode {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::TransportFailure(_) | SyncError::ParseError(_) => ExitCode::CheckFailed,
            SyncError::Busy => ExitCode::Busy,
            SyncError::Cancelled => ExitCode::Cancelled,
            SyncError::ConfigError(_) | SyncError::InvalidTransition { .. } => ExitCode::InvalidInput,
            _ => ExitCode::GeneralError,
        }
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::CheckFailed => "CHECK_FAILED",
            ExitCode::Busy => "BUSY",
            ExitCode::Cancelled => "CANCELLED",
            ExitCode::InvalidInput => "INVALID_INPUT",
        }
    }
}
