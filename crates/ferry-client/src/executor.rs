//! Operation executor
//!
//! Every remote operation funnels through [`Executor::run`]: take an
//! admission permit, resolve the pooled session and a channel, run the
//! operation body under the channel's lock, and classify the outcome.
//! Transport errors become [`ShareError`] here and nowhere else.
//!
//! # Retry
//! A recoverable failure (network or corruption class) triggers at most
//! one transparent retry. The failing channel is always discarded; the
//! pooled session is invalidated only when its link actually died, so a
//! session that outlived a broken channel keeps serving its other
//! channels and the retry reuses it. Invalidation is addressed to the
//! exact session the operation ran on, never to whatever currently sits
//! under the key. Write operations are retried only when the failure
//! happened before their body started, since payload bytes may already
//! have left.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use ferry_core::{ShareError, ShareTarget, TransportError};

use crate::connection_pool::ConnectionPool;
use crate::transport::Channel;

/// Attempts for one operation: the original plus one transparent retry.
const MAX_ATTEMPTS: usize = 2;

/// How an operation's failure may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    /// Safe to rerun wholesale; the remote state is unchanged by a
    /// failed attempt.
    Read,
    /// May have mutated remote state once the body starts.
    Write,
}

impl OpKind {
    /// Whether a failure inside the operation body may be retried.
    /// Writes repeat only their acquisition phase.
    const fn retries_execute_failures(self) -> bool {
        matches!(self, OpKind::Read)
    }
}

/// Statistics for executor monitoring
#[derive(Debug, Default)]
pub struct ExecutorStats {
    /// Operations started
    pub operations: AtomicU64,
    /// Transparent retries performed
    pub retries: AtomicU64,
    /// Operations surfaced as errors
    pub failures: AtomicU64,
}

#[derive(Clone)]
pub(crate) struct Executor {
    pool: Arc<ConnectionPool>,
    stats: Arc<ExecutorStats>,
}

impl Executor {
    pub(crate) fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            stats: Arc::new(ExecutorStats::default()),
        }
    }

    pub(crate) fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run one remote operation against `target`.
    ///
    /// `path` is context for error reporting only; the body captures
    /// whatever paths it needs. The admission permit is held for the
    /// full call, retry included.
    pub(crate) async fn run<T, F>(
        &self,
        target: &ShareTarget,
        path: &str,
        kind: OpKind,
        op: F,
    ) -> Result<T, ShareError>
    where
        T: Send,
        F: for<'a> Fn(&'a mut dyn Channel) -> BoxFuture<'a, Result<T, TransportError>>
            + Send
            + Sync,
    {
        let _permit = self.pool.admit().await?;
        self.stats.operations.fetch_add(1, Ordering::Relaxed);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = attempt >= MAX_ATTEMPTS;

            let connection = match self.pool.acquire(&target.key, &target.credentials).await {
                Ok(connection) => connection,
                Err(e) => {
                    if !last && e.class().is_recoverable() {
                        debug!(key = %target.key, error = %e, "session acquisition failed, retrying");
                        self.stats.retries.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(ShareError::from_transport(e, &target.key, path));
                }
            };

            let acquired = match connection.channels.get_or_create(connection.session()).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    let recoverable = e.class().is_recoverable();
                    if recoverable {
                        // A session that cannot open channels is not worth keeping.
                        self.pool.invalidate(&target.key, &connection).await;
                    }
                    if !last && recoverable {
                        debug!(key = %target.key, error = %e, "channel acquisition failed, retrying");
                        self.stats.retries.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(ShareError::from_transport(e, &target.key, path));
                }
            };

            let (channel, mut guard) = acquired.into_locked().await;

            match op(&mut **guard).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(key = %target.key, path, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let class = e.class();
                    if class.is_recoverable() {
                        // The channel is gone either way; the session goes
                        // only if its link died with it.
                        connection.channels.remove(&channel, guard).await;
                        if !connection.is_alive() {
                            self.pool.invalidate(&target.key, &connection).await;
                        }
                        if !last && kind.retries_execute_failures() {
                            warn!(
                                key = %target.key,
                                path,
                                error = %e,
                                "recoverable failure, retrying on a fresh channel"
                            );
                            self.stats.retries.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    }
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(ShareError::from_transport(e, &target.key, path));
                }
            }
        }
    }

    pub(crate) fn stats(&self) -> ExecutorStatsSnapshot {
        ExecutorStatsSnapshot {
            operations: self.stats.operations.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of executor statistics
#[derive(Debug, Clone)]
pub struct ExecutorStatsSnapshot {
    pub operations: u64,
    pub retries: u64,
    pub failures: u64,
}
