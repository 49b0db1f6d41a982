//! Error types for the sync core.
//!
//! A missing record or a missing cache is not an error here: lookups return
//! `Option` and callers treat `None` as ordinary control flow.

use thiserror::Error;

use crate::model::UpdateStatus;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or I/O failure while fetching a manifest
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The outstanding fetch was cancelled by the user
    #[error("fetch cancelled")]
    Cancelled,

    /// The manifest could not be parsed; the durable cache is left untouched
    #[error("manifest parse error: {0}")]
    ParseError(String),

    /// A status change not allowed by the status machine
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: UpdateStatus,
        to: UpdateStatus,
    },

    /// A manifest refresh is already in flight
    #[error("a manifest refresh is already in progress")]
    Busy,

    /// The background worker is not reachable
    #[error("background worker disconnected")]
    Disconnected,

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// JSON error outside of manifest parsing (preferences)
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the failure should be shown to the user.
    ///
    /// Cancellation and busy rejections are silent; everything else is
    /// reported as "refresh failed, try again".
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SyncError::Cancelled | SyncError::Busy)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::TransportFailure(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigError(err.to_string())
    }
}
