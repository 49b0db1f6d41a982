//! Manifest fetcher.
//!
//! Issues one fetch at a time through a [`Transport`] into a temp file and
//! reports exactly one terminal outcome per call:
//!
//! - `Ok(())` once the temp file is fully written and closed
//! - `Err(SyncError::Cancelled)` after [`ManifestFetcher::cancel`]
//! - `Err(SyncError::TransportFailure)` for network or I/O failures
//! - `Err(SyncError::Busy)` if another fetch is still outstanding; the
//!   running fetch is not disturbed
//!
//! On any failure the partially written temp file is removed.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::store::TempFileGuard;

/// Default connect timeout for manifest requests in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout for manifest requests in seconds.
const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;

/// Byte transport used to fetch manifests.
///
/// Timeout policy belongs to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` into `dest`, creating or truncating it.
    ///
    /// On `Ok(())` the file must be completely written and closed.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), SyncError>;
}

/// HTTP(S) transport built on reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the default timeouts.
    pub fn new() -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS))
            .user_agent(format!("ota-sync/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), SyncError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::TransportFailure(format!(
                "manifest request failed with status {}",
                status.as_u16()
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        debug!(url, bytes = written, "Manifest downloaded");
        Ok(())
    }
}

/// Single-flight manifest fetcher with cancellation.
pub struct ManifestFetcher {
    transport: Arc<dyn Transport>,
    in_flight: AtomicBool,
    /// Bumped on every cancel request; running fetches watch for changes
    cancel_tx: watch::Sender<u64>,
}

impl ManifestFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (cancel_tx, _) = watch::channel(0);
        Self {
            transport,
            in_flight: AtomicBool::new(false),
            cancel_tx,
        }
    }

    /// Whether a fetch is currently outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Fetch `url` into `dest`.
    ///
    /// See the module docs for the outcome contract.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<(), SyncError> {
        // Subscribe first so a cancel issued right after the flag flips is
        // still observed.
        let mut cancel_rx = self.cancel_tx.subscribe();
        let _guard = FlightGuard::acquire(&self.in_flight).ok_or_else(|| {
            warn!(url, "Manifest fetch rejected, another fetch is in flight");
            SyncError::Busy
        })?;

        let partial = TempFileGuard::new(dest);
        debug!(url, dest = ?dest, "Fetching manifest");

        let result = tokio::select! {
            biased;
            _ = cancel_rx.changed() => Err(SyncError::Cancelled),
            result = self.transport.fetch(url, dest) => result,
        };

        match result {
            Ok(()) => {
                partial.keep();
                info!(url, "Manifest fetch complete");
                Ok(())
            }
            Err(e) => {
                drop(partial);
                match e {
                    SyncError::Cancelled => {
                        info!(url, "Manifest fetch cancelled");
                        Err(SyncError::Cancelled)
                    }
                    SyncError::IoError(io) => {
                        warn!(url, error = %io, "Manifest fetch failed");
                        Err(SyncError::TransportFailure(io.to_string()))
                    }
                    other => {
                        warn!(url, error = %other, "Manifest fetch failed");
                        Err(other)
                    }
                }
            }
        }
    }

    /// Cancel the outstanding fetch, if any.
    ///
    /// Returns whether a fetch was in flight. The cancelled `fetch` call
    /// resolves with `SyncError::Cancelled`.
    pub fn cancel(&self) -> bool {
        let busy = self.is_busy();
        if busy {
            self.cancel_tx.send_modify(|generation| *generation += 1);
        }
        busy
    }
}

/// Clears an in-flight flag when the owning future completes or is dropped.
pub(crate) struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlightGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Writes fixed content, optionally waiting for a release signal first.
    struct ScriptedTransport {
        body: Option<Vec<u8>>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<(), SyncError> {
            tokio::fs::write(dest, b"partial").await?;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match &self.body {
                Some(body) => {
                    tokio::fs::write(dest, body).await?;
                    Ok(())
                }
                None => Err(SyncError::TransportFailure("connection reset".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("manifest.tmp");
        let fetcher = ManifestFetcher::new(Arc::new(ScriptedTransport {
            body: Some(b"{\"response\": []}".to_vec()),
            gate: None,
        }));

        fetcher.fetch("https://example.com/u.json", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"{\"response\": []}");
        assert!(!fetcher.is_busy());
    }

    #[tokio::test]
    async fn test_fetch_failure_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("manifest.tmp");
        let fetcher = ManifestFetcher::new(Arc::new(ScriptedTransport {
            body: None,
            gate: None,
        }));

        let err = fetcher.fetch("https://example.com/u.json", &dest).await.unwrap_err();
        assert!(matches!(err, SyncError::TransportFailure(_)));
        assert!(!dest.exists());
        assert!(!fetcher.is_busy());
    }

    #[tokio::test]
    async fn test_second_fetch_is_busy() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ManifestFetcher::new(Arc::new(ScriptedTransport {
            body: Some(b"{}".to_vec()),
            gate: Some(gate.clone()),
        })));

        let first = {
            let fetcher = fetcher.clone();
            let dest = dir.path().join("a.tmp");
            tokio::spawn(async move { fetcher.fetch("https://example.com", &dest).await })
        };
        while !fetcher.is_busy() {
            tokio::task::yield_now().await;
        }

        let second = fetcher.fetch("https://example.com", &dir.path().join("b.tmp")).await;
        assert!(matches!(second, Err(SyncError::Busy)));
        assert!(!dir.path().join("b.tmp").exists());

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_yields_single_cancelled_outcome() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("manifest.tmp");
        let fetcher = Arc::new(ManifestFetcher::new(Arc::new(ScriptedTransport {
            body: Some(b"{}".to_vec()),
            gate: Some(Arc::new(Notify::new())),
        })));

        let task = {
            let fetcher = fetcher.clone();
            let dest = dest.clone();
            tokio::spawn(async move { fetcher.fetch("https://example.com", &dest).await })
        };
        while !fetcher.is_busy() {
            tokio::task::yield_now().await;
        }

        assert!(fetcher.cancel());
        let result = task.await.unwrap();
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(!dest.exists());
        assert!(!fetcher.cancel());
    }

    #[tokio::test]
    async fn test_dropped_fetch_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("manifest.tmp");
        let fetcher = ManifestFetcher::new(Arc::new(ScriptedTransport {
            body: Some(b"{}".to_vec()),
            gate: Some(Arc::new(Notify::new())),
        }));

        let stalled = tokio::time::timeout(
            Duration::from_millis(50),
            fetcher.fetch("https://example.com", &dest),
        )
        .await;
        assert!(stalled.is_err());
        assert!(!dest.exists());
        assert!(!fetcher.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_right_after_start_is_observed() {
        let dir = TempDir::new().unwrap();
        for round in 0..20 {
            let dest = dir.path().join(format!("m{round}.tmp"));
            let fetcher = Arc::new(ManifestFetcher::new(Arc::new(ScriptedTransport {
                body: Some(b"{}".to_vec()),
                gate: Some(Arc::new(Notify::new())),
            })));

            let task = {
                let fetcher = fetcher.clone();
                tokio::spawn(async move { fetcher.fetch("https://example.com", &dest).await })
            };
            while !fetcher.cancel() {
                tokio::task::yield_now().await;
            }
            let result = tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("fetch ignored the cancel request")
                .unwrap();
            assert!(matches!(result, Err(SyncError::Cancelled)));
        }
    }

    #[tokio::test]
    async fn test_cancel_before_fetch_does_not_poison_next_fetch() {
        let dir = TempDir::new().unwrap();
        let fetcher = ManifestFetcher::new(Arc::new(ScriptedTransport {
            body: Some(b"{}".to_vec()),
            gate: None,
        }));

        assert!(!fetcher.cancel());
        fetcher
            .fetch("https://example.com", &dir.path().join("m.tmp"))
            .await
            .unwrap();
    }
}
