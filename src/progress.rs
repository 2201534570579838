//! Download progress derived from on-disk file size
//!
//! The wrapped tool reports nothing while a download runs, but it streams
//! into `<output>.tmp` and renames to `<output>` on completion. A poller
//! stats those paths on a fixed cadence and publishes the observed size, so
//! front-ends get a live progress figure without any tool cooperation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::types::Event;

/// Live progress counters for the download in flight
///
/// Updated by the size poller, read lock-free by front-ends. `expected` is
/// zero when no size hint is known.
#[derive(Debug, Default)]
pub struct ProgressState {
    bytes: AtomicU64,
    expected: AtomicU64,
    active: AtomicBool,
}

/// Point-in-time copy of the progress counters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Bytes observed on disk
    pub bytes: u64,
    /// Expected total size in bytes (0 = unknown)
    pub expected_bytes: u64,
}

impl ProgressState {
    /// Fresh, inactive state with no counters set
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes observed on disk so far
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Expected total size (0 = unknown)
    pub fn expected_bytes(&self) -> u64 {
        self.expected.load(Ordering::Relaxed)
    }

    /// Whether a poller should keep publishing
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Copy of both counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes: self.bytes(),
            expected_bytes: self.expected_bytes(),
        }
    }

    pub(crate) fn record_bytes(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::Relaxed);
    }

    pub(crate) fn set_expected(&self, expected: u64) {
        self.expected.store(expected, Ordering::Relaxed);
    }

    /// Claims the counters for a new download, zeroing them
    ///
    /// False when a download is already being tracked.
    pub(crate) fn try_begin(&self) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.bytes.store(0, Ordering::Relaxed);
        self.expected.store(0, Ordering::Relaxed);
        true
    }

    pub(crate) fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Parameters for spawning a download size poller
pub(crate) struct SizePollerParams {
    /// In-flight path the tool streams into
    pub transient_path: PathBuf,
    /// Path the finished package is renamed to
    pub final_path: PathBuf,
    /// Counters to publish into
    pub state: Arc<ProgressState>,
    /// Poll cadence
    pub interval: Duration,
    /// Event broadcast sender
    pub event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Cancellation token
    pub cancel_token: tokio_util::sync::CancellationToken,
}

/// Spawns a background task that polls the download's on-disk size.
///
/// The transient path is preferred; once the rename happens the final path
/// is measured instead. Neither file existing yet is normal and publishes
/// nothing. The task stops within one interval of cancellation or of the
/// state going inactive, and never errors.
pub(crate) fn spawn_size_poller(params: SizePollerParams) -> tokio::task::JoinHandle<()> {
    let SizePollerParams {
        transient_path,
        final_path,
        state,
        interval,
        event_tx,
        cancel_token,
    } = params;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !state.is_active() || cancel_token.is_cancelled() {
                        break;
                    }

                    if let Some(bytes) = measure(&transient_path, &final_path).await {
                        // Cancelled during the stat: the counters may already
                        // belong to the next download, so publish nothing.
                        if cancel_token.is_cancelled() {
                            break;
                        }
                        state.record_bytes(bytes);
                        event_tx
                            .send(Event::DownloadProgress {
                                bytes,
                                expected_bytes: state.expected_bytes(),
                            })
                            .ok();
                    }

                    // Deactivation during the stat still stops us this tick.
                    if !state.is_active() {
                        break;
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}

/// Size of the download on disk: the transient file while the tool streams,
/// the final file after the rename, nothing before either exists
async fn measure(transient_path: &Path, final_path: &Path) -> Option<u64> {
    for path in [transient_path, final_path] {
        if let Ok(metadata) = tokio::fs::metadata(path).await {
            return Some(metadata.len());
        }
    }
    None
}
