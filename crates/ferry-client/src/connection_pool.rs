//! Process-wide connection pool
//!
//! One pooled session per [`ShareKey`], created lazily and torn down by
//! error-triggered invalidation, idle reaping, or shutdown. The map lock
//! serializes lookup and insert, so concurrent first access for one key
//! builds exactly one session; remote operations themselves always run
//! outside it.
//!
//! Lock ordering: the connection map lock is released before any channel
//! mutex is awaited. Channel-list mutation is guarded inside
//! [`ChannelPool`] and never overlaps the map lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use ferry_core::{Config, Credentials, ShareError, ShareKey, TransportError};

use crate::channel_pool::ChannelPool;
use crate::transport::{Session, Transport};

/// One pooled session with its channel set and idle bookkeeping.
pub struct PooledConnection {
    key: ShareKey,
    session: Box<dyn Session>,
    pub(crate) channels: ChannelPool,
    /// Stamped on every successful acquisition
    last_used: SyncMutex<Instant>,
}

impl PooledConnection {
    fn new(key: ShareKey, session: Box<dyn Session>, max_channels: usize) -> Self {
        Self {
            key,
            session,
            channels: ChannelPool::new(max_channels),
            last_used: SyncMutex::new(Instant::now()),
        }
    }

    pub fn key(&self) -> &ShareKey {
        &self.key
    }

    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    pub fn is_alive(&self) -> bool {
        self.session.is_alive()
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    /// Close all channels, then the session. Idempotent.
    pub(crate) async fn teardown(&self) {
        self.channels.clear().await;
        self.session.disconnect().await;
    }
}

/// Statistics for connection pool monitoring
#[derive(Debug, Default)]
pub struct ConnectionPoolStats {
    /// Sessions built via the transport
    pub sessions_created: AtomicU64,
    /// Acquisitions served by an existing live session
    pub sessions_reused: AtomicU64,
    /// Entries torn down after a classified failure
    pub invalidated: AtomicU64,
    /// Entries evicted by the idle sweep
    pub reaped: AtomicU64,
}

/// Map of pooled sessions plus the global admission gate.
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    connections: Mutex<HashMap<ShareKey, Arc<PooledConnection>>>,
    /// Bounds concurrently executing operations across the whole pool,
    /// independent of how many idle sessions the map holds
    admission: Arc<Semaphore>,
    max_channels_per_session: usize,
    connect_timeout: Duration,
    idle_timeout: Duration,
    stats: Arc<ConnectionPoolStats>,
}

impl ConnectionPool {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self {
            transport,
            connections: Mutex::new(HashMap::new()),
            admission: Arc::new(Semaphore::new(
                config.pool.max_concurrent_connections.max(1),
            )),
            max_channels_per_session: config.pool.max_channels_per_session,
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
            stats: Arc::new(ConnectionPoolStats::default()),
        }
    }

    /// Take one admission permit, waiting at capacity. The permit is
    /// released by dropping it, including on cancellation.
    pub async fn admit(&self) -> Result<OwnedSemaphorePermit, ShareError> {
        self.admission
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ShareError::PoolClosed)
    }

    /// Return the live connection for `key`, or build and store one.
    ///
    /// A dead entry is removed before its replacement is created; its
    /// teardown runs in the background.
    pub async fn acquire(
        &self,
        key: &ShareKey,
        credentials: &Credentials,
    ) -> Result<Arc<PooledConnection>, TransportError> {
        let mut connections = self.connections.lock().await;

        if let Some(existing) = connections.get(key) {
            if existing.is_alive() {
                existing.touch();
                self.stats.sessions_reused.fetch_add(1, Ordering::Relaxed);
                return Ok(existing.clone());
            }
            warn!(key = %key, "pooled session dead, rebuilding");
            if let Some(dead) = connections.remove(key) {
                tokio::spawn(async move { dead.teardown().await });
            }
        }

        let session = self.connect(key, credentials).await?;
        let connection = Arc::new(PooledConnection::new(
            key.clone(),
            session,
            self.max_channels_per_session,
        ));
        connections.insert(key.clone(), connection.clone());
        self.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
        Ok(connection)
    }

    async fn connect(
        &self,
        key: &ShareKey,
        credentials: &Credentials,
    ) -> Result<Box<dyn Session>, TransportError> {
        debug!(key = %key, method = credentials.method(), "opening session");
        match tokio::time::timeout(self.connect_timeout, self.transport.connect(key, credentials))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.connect_timeout)),
        }
    }

    /// Forcibly disconnect and remove the entry for `key`, provided it
    /// still is `expected`. A replacement built under the same key after
    /// `expected` failed is left untouched, so a caller reporting a stale
    /// session can never tear down the rebuild another caller is using.
    /// Already-removed entries tear down as a no-op.
    pub async fn invalidate(&self, key: &ShareKey, expected: &Arc<PooledConnection>) {
        let removed = {
            let mut connections = self.connections.lock().await;
            let is_current = connections
                .get(key)
                .map_or(false, |c| Arc::ptr_eq(c, expected));
            if is_current {
                connections.remove(key)
            } else {
                None
            }
        };
        if let Some(connection) = removed {
            self.stats.invalidated.fetch_add(1, Ordering::Relaxed);
            info!(key = %key, "invalidating pooled connection");
            connection.teardown().await;
        }
    }

    /// Tear down every entry. The pool stays usable; the next operation
    /// builds a fresh session.
    pub async fn disconnect_all(&self) {
        let drained: Vec<(ShareKey, Arc<PooledConnection>)> = {
            let mut connections = self.connections.lock().await;
            connections.drain().collect()
        };
        let count = drained.len();
        for (key, connection) in drained {
            debug!(key = %key, "disconnecting pooled session");
            connection.teardown().await;
        }
        if count > 0 {
            info!(count, "disconnected all pooled sessions");
        }
    }

    /// Evict sessions idle beyond the timeout. Their disconnect runs in a
    /// background task so the caller never waits on cleanup.
    pub async fn sweep_idle(&self) {
        let expired: Vec<(ShareKey, Arc<PooledConnection>)> = {
            let mut connections = self.connections.lock().await;
            let stale: Vec<ShareKey> = connections
                .iter()
                .filter(|(_, c)| c.idle_for() >= self.idle_timeout)
                .map(|(k, _)| k.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|k| connections.remove(&k).map(|c| (k, c)))
                .collect()
        };

        if expired.is_empty() {
            return;
        }
        self.stats
            .reaped
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        tokio::spawn(async move {
            for (key, connection) in expired {
                debug!(key = %key, "reaping idle session");
                connection.teardown().await;
            }
        });
    }

    /// Start the periodic idle sweep.
    pub fn start_reaper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                pool.sweep_idle().await;
            }
        })
    }

    /// Number of pooled sessions, live or idle.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn contains(&self, key: &ShareKey) -> bool {
        self.connections.lock().await.contains_key(key)
    }

    pub fn stats(&self) -> ConnectionPoolStatsSnapshot {
        ConnectionPoolStatsSnapshot {
            sessions_created: self.stats.sessions_created.load(Ordering::Relaxed),
            sessions_reused: self.stats.sessions_reused.load(Ordering::Relaxed),
            invalidated: self.stats.invalidated.load(Ordering::Relaxed),
            reaped: self.stats.reaped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of connection pool statistics
#[derive(Debug, Clone)]
pub struct ConnectionPoolStatsSnapshot {
    pub sessions_created: u64,
    pub sessions_reused: u64,
    pub invalidated: u64,
    pub reaped: u64,
}
