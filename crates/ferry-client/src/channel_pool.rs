//! Per-session channel pool
//!
//! Manages the channels multiplexed over one pooled session. Each channel
//! is wrapped in its own mutex; holding that mutex is what makes a remote
//! operation exclusive on its channel.
//!
//! # Design
//! - Free channels are claimed by `try_lock`, so concurrent callers spread
//!   across distinct channels while any are idle
//! - Below the cap, a busy pool opens a fresh channel
//! - At the cap, callers are handed the oldest channel and serialize on its
//!   lock - backpressure by serialization instead of unbounded growth
//!
//! The list lock guards membership and serializes channel creation, which
//! keeps the cap exact under concurrent openers. It is never held while
//! waiting on an individual channel's mutex; claims under it use
//! `try_lock` only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use ferry_core::TransportError;

use crate::transport::{Channel, Session};

/// A pooled channel: the transport handle behind its exclusive lock.
pub type PooledChannel = Arc<Mutex<Box<dyn Channel>>>;

/// Guard type for an exclusively held channel.
pub type ChannelGuard = OwnedMutexGuard<Box<dyn Channel>>;

/// Result of an acquisition: the channel, plus its lock when the pool
/// could claim it without blocking. `guard: None` means the caller must
/// wait on the channel's mutex itself (the at-cap backpressure path).
pub struct AcquiredChannel {
    pub channel: PooledChannel,
    pub guard: Option<ChannelGuard>,
}

impl AcquiredChannel {
    /// Wait for exclusive use of the channel if it was not pre-claimed.
    pub async fn into_locked(self) -> (PooledChannel, ChannelGuard) {
        match self.guard {
            Some(guard) => (self.channel, guard),
            None => {
                let guard = self.channel.clone().lock_owned().await;
                (self.channel, guard)
            }
        }
    }
}

/// Statistics for channel pool monitoring
#[derive(Debug, Default)]
pub struct ChannelPoolStats {
    /// Channels opened over the pool's lifetime
    pub opened: AtomicU64,
    /// Acquisitions served by an idle existing channel
    pub reused: AtomicU64,
    /// Acquisitions that fell through to the oldest channel (backpressure)
    pub backpressure_events: AtomicU64,
    /// Channels removed after corruption
    pub removed: AtomicU64,
}

/// Bounded set of channels for one session.
pub struct ChannelPool {
    /// Registered channels, oldest first
    channels: Mutex<Vec<PooledChannel>>,
    /// Per-session cap; beyond it callers serialize
    max_channels: usize,
    stats: Arc<ChannelPoolStats>,
}

impl ChannelPool {
    pub fn new(max_channels: usize) -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
            // A cap of zero would leave every caller without a channel
            max_channels: max_channels.max(1),
            stats: Arc::new(ChannelPoolStats::default()),
        }
    }

    /// Acquire a channel for one operation.
    ///
    /// Scans for an idle live channel first, opens a new one below the
    /// cap, and otherwise returns the oldest so the caller blocks on its
    /// lock. Dead channels found during the scan are dropped from the
    /// list and closed after the structural lock is released.
    pub async fn get_or_create(
        &self,
        session: &dyn Session,
    ) -> Result<AcquiredChannel, TransportError> {
        let mut stale: Vec<ChannelGuard> = Vec::new();

        let acquired = {
            let mut channels = self.channels.lock().await;

            let mut claimed: Option<(PooledChannel, ChannelGuard)> = None;
            let mut dead: Vec<usize> = Vec::new();

            for (idx, channel) in channels.iter().enumerate() {
                // Busy channels are presumed live; their current holder
                // will report corruption if they are not.
                let Ok(guard) = channel.clone().try_lock_owned() else {
                    continue;
                };
                if guard.is_alive() {
                    claimed = Some((channel.clone(), guard));
                    break;
                }
                dead.push(idx);
                stale.push(guard);
            }

            // Drop dead entries before counting against the cap.
            for idx in dead.into_iter().rev() {
                channels.remove(idx);
                self.stats.removed.fetch_add(1, Ordering::Relaxed);
            }

            if let Some((channel, guard)) = claimed {
                self.stats.reused.fetch_add(1, Ordering::Relaxed);
                AcquiredChannel {
                    channel,
                    guard: Some(guard),
                }
            } else if channels.len() < self.max_channels {
                let opened = match session.open_channel().await {
                    Ok(opened) => opened,
                    Err(e) => {
                        drop(channels);
                        for mut guard in stale {
                            guard.close().await;
                        }
                        return Err(e);
                    }
                };
                let channel: PooledChannel = Arc::new(Mutex::new(opened));
                channels.push(channel.clone());
                self.stats.opened.fetch_add(1, Ordering::Relaxed);
                debug!(count = channels.len(), "opened pooled channel");
                let guard = channel
                    .clone()
                    .try_lock_owned()
                    .expect("freshly created channel is unlocked");
                AcquiredChannel {
                    channel,
                    guard: Some(guard),
                }
            } else {
                let channel = channels[0].clone();
                self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
                AcquiredChannel {
                    channel,
                    guard: None,
                }
            }
        };

        for mut guard in stale {
            guard.close().await;
        }

        Ok(acquired)
    }

    /// Disconnect and deregister a channel confirmed dead.
    ///
    /// The caller passes the guard it already holds; the channel is closed
    /// through it after deregistration, outside the structural lock.
    pub async fn remove(&self, channel: &PooledChannel, mut guard: ChannelGuard) {
        {
            let mut channels = self.channels.lock().await;
            if let Some(idx) = channels.iter().position(|c| Arc::ptr_eq(c, channel)) {
                channels.remove(idx);
                self.stats.removed.fetch_add(1, Ordering::Relaxed);
            }
        }
        guard.close().await;
        debug!("removed corrupted channel");
    }

    /// Close every idle channel and empty the list.
    ///
    /// Channels currently mid-operation are skipped; their holders will
    /// observe the session teardown and discard them.
    pub async fn clear(&self) {
        let drained: Vec<PooledChannel> = {
            let mut channels = self.channels.lock().await;
            std::mem::take(&mut *channels)
        };
        for channel in drained {
            if let Ok(mut guard) = channel.try_lock_owned() {
                guard.close().await;
            }
        }
    }

    /// Number of registered channels.
    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub fn stats(&self) -> ChannelPoolStatsSnapshot {
        ChannelPoolStatsSnapshot {
            opened: self.stats.opened.load(Ordering::Relaxed),
            reused: self.stats.reused.load(Ordering::Relaxed),
            backpressure_events: self.stats.backpressure_events.load(Ordering::Relaxed),
            removed: self.stats.removed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of channel pool statistics
#[derive(Debug, Clone)]
pub struct ChannelPoolStatsSnapshot {
    pub opened: u64,
    pub reused: u64,
    pub backpressure_events: u64,
    pub removed: u64,
}
