//! Share client facade
//!
//! The surface the orchestration layer calls. Every operation takes a
//! [`ShareTarget`] naming the remote share and runs through the executor,
//! so pooling, channel locking, classification, and the transparent
//! retry all apply uniformly.
//!
//! # Design
//! - Paths are validated here, before any network activity
//! - Bulk downloads move chunk by chunk through the pooled path, so an
//!   interrupted transfer resumes at the last delivered byte instead of
//!   restarting
//! - Long sequential reads get a dedicated channel via
//!   [`open_input_stream`](ShareClient::open_input_stream) so they never
//!   starve short operations
//! - `test_connection` is stateless: it opens and drops a session without
//!   touching the pool

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use ferry_core::{
    path, Config, FileAttributes, ShareError, ShareTarget, TransportError,
};

use crate::connection_pool::{ConnectionPool, ConnectionPoolStatsSnapshot, PooledConnection};
use crate::executor::{Executor, ExecutorStatsSnapshot, OpKind};
use crate::ops;
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::stream::RemoteStream;
use crate::transport::{Channel, Transport};

/// Pooled client for remote file shares.
///
/// One instance per process is the intended shape; it owns the connection
/// pool and hands sessions out across all targets.
pub struct ShareClient {
    transport: Arc<dyn Transport>,
    pool: Arc<ConnectionPool>,
    executor: Executor,
    config: Config,
    reaper: SyncMutex<Option<JoinHandle<()>>>,
}

impl ShareClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, Config::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: Config) -> Self {
        let pool = Arc::new(ConnectionPool::new(transport.clone(), &config));
        Self {
            transport,
            executor: Executor::new(pool.clone()),
            pool,
            config,
            reaper: SyncMutex::new(None),
        }
    }

    /// Start the periodic idle reaper. Safe to call more than once; a
    /// previous reaper task is replaced.
    pub fn start_reaper(&self) {
        let handle = self.pool.start_reaper(self.config.reap_interval());
        if let Some(old) = self.reaper.lock().replace(handle) {
            old.abort();
        }
    }

    /// List files under `root`. Directories are traversed when
    /// `recursive`, never returned themselves; results are in
    /// deterministic name order.
    pub async fn list_files(
        &self,
        target: &ShareTarget,
        root: &str,
        recursive: bool,
    ) -> Result<Vec<String>, ShareError> {
        checked(root)?;
        let p = root.to_string();
        self.executor
            .run(target, root, OpKind::Read, move |channel: &mut dyn Channel| {
                let path = p.clone();
                Box::pin(async move { ops::list_files(channel, &path, recursive).await })
            })
            .await
    }

    /// Read the whole object, optionally capped at `max_bytes`.
    pub async fn read_bytes(
        &self,
        target: &ShareTarget,
        path: &str,
        max_bytes: Option<u64>,
    ) -> Result<Bytes, ShareError> {
        checked(path)?;
        let p = path.to_string();
        self.executor
            .run(target, path, OpKind::Read, move |channel: &mut dyn Channel| {
                let path = p.clone();
                Box::pin(async move {
                    ops::read_all(channel, &path, max_bytes).await.map(Bytes::from)
                })
            })
            .await
    }

    /// Read up to `length` bytes starting at `offset`. Short at end of
    /// file, never an error.
    pub async fn read_range(
        &self,
        target: &ShareTarget,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, ShareError> {
        checked(path)?;
        let p = path.to_string();
        self.executor
            .run(target, path, OpKind::Read, move |channel: &mut dyn Channel| {
                let path = p.clone();
                Box::pin(async move {
                    ops::read_range(channel, &path, offset, length)
                        .await
                        .map(Bytes::from)
                })
            })
            .await
    }

    /// Stream the object at `path` into `sink`. Returns bytes delivered.
    ///
    /// Chunks move through the pooled path one range read at a time, so a
    /// recoverable failure mid-transfer costs one chunk retry, not a
    /// restart, and the sink never sees a byte twice.
    pub async fn download_to_stream<W>(
        &self,
        target: &ShareTarget,
        path: &str,
        sink: &mut W,
        progress: Option<ProgressCallback>,
    ) -> Result<u64, ShareError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        checked(path)?;
        let total = self.stat(target, path).await?.size;
        let reporter = ProgressReporter::new(progress, total);
        let chunk = self.config.transfer.chunk_size.max(1) as u64;

        loop {
            let offset = reporter.transferred();
            let data = self.read_range(target, path, offset, chunk).await?;
            if data.is_empty() {
                break;
            }
            sink.write_all(&data).await.map_err(|e| ShareError::Io {
                reason: format!("sink write failed: {e}"),
            })?;
            reporter.advance(data.len() as u64);
            if (data.len() as u64) < chunk {
                break;
            }
        }

        sink.flush().await.map_err(|e| ShareError::Io {
            reason: format!("sink flush failed: {e}"),
        })?;
        Ok(reporter.transferred())
    }

    /// Write a buffer to `path`, creating missing parent directories.
    pub async fn upload_bytes(
        &self,
        target: &ShareTarget,
        path: &str,
        data: Bytes,
        progress: Option<ProgressCallback>,
    ) -> Result<(), ShareError> {
        checked(path)?;
        let reporter = Arc::new(ProgressReporter::new(progress, data.len() as u64));
        let p = path.to_string();
        self.executor
            .run(target, path, OpKind::Write, move |channel: &mut dyn Channel| {
                let path = p.clone();
                let data = data.clone();
                let reporter = reporter.clone();
                Box::pin(async move {
                    ops::upload_buffer(channel, &path, &data, &reporter).await
                })
            })
            .await
    }

    /// Stream `source` to `path`, creating missing parent directories.
    /// `size` is the expected total, used for progress reporting.
    pub async fn upload_stream<R>(
        &self,
        target: &ShareTarget,
        path: &str,
        source: R,
        size: u64,
        progress: Option<ProgressCallback>,
    ) -> Result<(), ShareError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        checked(path)?;
        let reporter = Arc::new(ProgressReporter::new(progress, size));
        let source: Arc<ops::SharedSource> = Arc::new(Mutex::new(Box::new(source)));
        let p = path.to_string();
        self.executor
            .run(target, path, OpKind::Write, move |channel: &mut dyn Channel| {
                let path = p.clone();
                let source = source.clone();
                let reporter = reporter.clone();
                Box::pin(async move {
                    ops::upload_stream(channel, &path, &source, &reporter).await
                })
            })
            .await
    }

    pub async fn stat(
        &self,
        target: &ShareTarget,
        path: &str,
    ) -> Result<FileAttributes, ShareError> {
        checked(path)?;
        let p = path.to_string();
        self.executor
            .run(target, path, OpKind::Read, move |channel: &mut dyn Channel| {
                let path = p.clone();
                Box::pin(async move { channel.stat(&path).await })
            })
            .await
    }

    /// Whether `path` exists. Only a not-found outcome maps to `false`;
    /// any other failure surfaces, so "absent" and "couldn't check" stay
    /// distinguishable.
    pub async fn exists(&self, target: &ShareTarget, path: &str) -> Result<bool, ShareError> {
        match self.stat(target, path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn mkdir(&self, target: &ShareTarget, path: &str) -> Result<(), ShareError> {
        checked(path)?;
        let p = path.to_string();
        self.executor
            .run(target, path, OpKind::Write, move |channel: &mut dyn Channel| {
                let path = p.clone();
                Box::pin(async move { channel.mkdir(&path).await })
            })
            .await
    }

    pub async fn delete_file(&self, target: &ShareTarget, path: &str) -> Result<(), ShareError> {
        checked(path)?;
        let p = path.to_string();
        self.executor
            .run(target, path, OpKind::Write, move |channel: &mut dyn Channel| {
                let path = p.clone();
                Box::pin(async move { channel.remove_file(&path).await })
            })
            .await
    }

    /// Delete a directory and everything under it, children first.
    pub async fn delete_recursive(
        &self,
        target: &ShareTarget,
        path: &str,
    ) -> Result<(), ShareError> {
        checked(path)?;
        let p = path.to_string();
        self.executor
            .run(target, path, OpKind::Write, move |channel: &mut dyn Channel| {
                let path = p.clone();
                Box::pin(async move { ops::delete_tree(channel, &path).await })
            })
            .await
    }

    pub async fn rename(
        &self,
        target: &ShareTarget,
        from: &str,
        to: &str,
    ) -> Result<(), ShareError> {
        checked(from)?;
        checked(to)?;
        let f = from.to_string();
        let t = to.to_string();
        self.executor
            .run(target, from, OpKind::Write, move |channel: &mut dyn Channel| {
                let from = f.clone();
                let to = t.clone();
                Box::pin(async move { channel.rename(&from, &to).await })
            })
            .await
    }

    /// Open a long-lived sequential read stream on a dedicated channel
    /// outside the shared pool.
    pub async fn open_input_stream(
        &self,
        target: &ShareTarget,
        path: &str,
    ) -> Result<RemoteStream, ShareError> {
        checked(path)?;
        let result = {
            let _permit = self.pool.admit().await?;
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.try_open_stream(target, path).await {
                    Ok(stream) => break Ok(stream),
                    Err(e) if e.class().is_recoverable() && attempt < 2 => {
                        debug!(key = %target.key, path, error = %e, "stream open failed, retrying");
                    }
                    Err(e) => break Err(ShareError::from_transport(e, &target.key, path)),
                }
            }
        };
        // Streams hold their channel for a long time; use the moment to
        // shed sessions nothing has touched in a while.
        self.pool.sweep_idle().await;
        result
    }

    async fn try_open_stream(
        &self,
        target: &ShareTarget,
        path: &str,
    ) -> Result<RemoteStream, TransportError> {
        let connection = self.pool.acquire(&target.key, &target.credentials).await?;
        match open_stream_on(connection.as_ref(), target, path).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                if e.class().is_recoverable() && !connection.is_alive() {
                    self.pool.invalidate(&target.key, &connection).await;
                }
                Err(e)
            }
        }
    }

    /// Open and authenticate a throwaway session for `target`, then drop
    /// it. Nothing is pooled; credential problems surface immediately.
    pub async fn test_connection(&self, target: &ShareTarget) -> Result<(), ShareError> {
        let connect = self
            .transport
            .connect(&target.key, &target.credentials);
        let session = match tokio::time::timeout(self.config.connect_timeout(), connect).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(ShareError::from_transport(e, &target.key, "/")),
            Err(_) => {
                return Err(ShareError::from_transport(
                    TransportError::Timeout(self.config.connect_timeout()),
                    &target.key,
                    "/",
                ))
            }
        };
        session.disconnect().await;
        Ok(())
    }

    /// Tear down every pooled session. The client stays usable; the next
    /// operation builds fresh sessions.
    pub async fn disconnect_all(&self) {
        self.pool.disconnect_all().await;
    }

    /// Stop the reaper and tear down the pool.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }
        self.pool.disconnect_all().await;
        info!("share client shut down");
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            pool: self.pool.stats(),
            executor: self.executor.stats(),
        }
    }
}

fn checked(path: &str) -> Result<(), ShareError> {
    path::validate(path).map_err(|e| ShareError::InvalidPath {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Open a dedicated read channel on `connection` and position it at the
/// start of `path`. The channel is never registered with the pooled set;
/// on failure it is closed here so nothing leaks.
async fn open_stream_on(
    connection: &PooledConnection,
    target: &ShareTarget,
    path: &str,
) -> Result<RemoteStream, TransportError> {
    let mut channel = connection.session().open_channel().await?;
    let attrs = match channel.stat(path).await {
        Ok(attrs) => attrs,
        Err(e) => {
            channel.close().await;
            return Err(e);
        }
    };
    let reader = match channel.open_read(path, 0).await {
        Ok(reader) => reader,
        Err(e) => {
            channel.close().await;
            return Err(e);
        }
    };
    Ok(RemoteStream::new(
        target.key.clone(),
        path.to_string(),
        attrs.size,
        reader,
        channel,
    ))
}

/// Counters across the client's pool and executor.
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub pool: ConnectionPoolStatsSnapshot,
    pub executor: ExecutorStatsSnapshot,
}
