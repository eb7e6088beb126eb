//! Transfer progress reporting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked as a transfer advances: `(bytes_transferred, total_bytes)`.
///
/// Called zero or more times, once per chunk moved. Reported byte counts
/// never decrease and never exceed the total.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Tracks bytes moved for one transfer and drives the optional callback.
pub(crate) struct ProgressReporter {
    callback: Option<ProgressCallback>,
    total: u64,
    transferred: AtomicU64,
}

impl ProgressReporter {
    pub(crate) fn new(callback: Option<ProgressCallback>, total: u64) -> Self {
        Self {
            callback,
            total,
            transferred: AtomicU64::new(0),
        }
    }

    /// Record `bytes` more and notify.
    ///
    /// The raw count can pass `total` if the remote object grew after it
    /// was sized; the reported value is capped, the raw count is not.
    pub(crate) fn advance(&self, bytes: u64) {
        let sent = self.transferred.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if let Some(callback) = &self.callback {
            callback(sent.min(self.total), self.total);
        }
    }

    /// Raw bytes recorded so far. Doubles as the resume offset when a
    /// transfer is continued after an interruption.
    pub(crate) fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }
}
