//! Transport abstraction layer
//!
//! The wire protocol lives behind these traits: a [`Transport`] opens
//! authenticated [`Session`]s, a session opens [`Channel`]s, and a channel
//! executes remote filesystem operations. Implementations resolve every
//! protocol-level outcome into a [`StatusCode`] at this boundary; nothing
//! above it sees protocol-native errors or status text.
//!
//! A channel is a single logical command/data stream. It is not safe for
//! concurrent multiplexed calls; the pool wraps each channel in its own
//! mutex and callers only ever reach one through that lock. A channel can
//! fail independently of its session - the session may open a replacement
//! while the broken channel is discarded.

use async_trait::async_trait;
use ferry_core::{Credentials, FileAttributes, RemoteEntry, ShareKey, TransportError};

/// Protocol entry point: opens and authenticates sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open one authenticated network connection to `key`.
    ///
    /// Rejected credentials surface as [`TransportError::Auth`]; everything
    /// socket-level as `Connect`/`Timeout`/`Io`.
    async fn connect(
        &self,
        key: &ShareKey,
        credentials: &Credentials,
    ) -> Result<Box<dyn Session>, TransportError>;
}

/// One authenticated network connection.
#[async_trait]
pub trait Session: Send + Sync {
    /// Whether the underlying link is still usable. Must be cheap; the
    /// pool calls this on every acquisition.
    fn is_alive(&self) -> bool;

    /// Open a fresh channel multiplexed over this session.
    async fn open_channel(&self) -> Result<Box<dyn Channel>, TransportError>;

    /// Tear down the connection. Idempotent; already-disconnected is a
    /// no-op.
    async fn disconnect(&self);
}

/// A single logical command/data stream over a session.
///
/// All methods take `&mut self`: exclusivity is enforced by the pool's
/// per-channel lock, and implementations may assume strictly serialized
/// calls.
#[async_trait]
pub trait Channel: Send {
    /// Whether this channel's session link is still alive.
    fn is_alive(&self) -> bool;

    /// List one directory. Implementations include `.`/`..` if the remote
    /// reports them; filtering happens above.
    async fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    async fn stat(&mut self, path: &str) -> Result<FileAttributes, TransportError>;

    async fn mkdir(&mut self, path: &str) -> Result<(), TransportError>;

    async fn remove_file(&mut self, path: &str) -> Result<(), TransportError>;

    /// Remove an empty directory. Non-empty directories fail with a
    /// protocol status; recursion happens above.
    async fn remove_dir(&mut self, path: &str) -> Result<(), TransportError>;

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError>;

    /// Open `path` for reading, positioned at `offset`.
    async fn open_read(
        &mut self,
        path: &str,
        offset: u64,
    ) -> Result<Box<dyn RemoteReader>, TransportError>;

    /// Open `path` for writing, creating it or truncating existing
    /// content.
    async fn open_write(&mut self, path: &str) -> Result<Box<dyn RemoteWriter>, TransportError>;

    /// Disconnect this channel. Best-effort; the session stays up.
    async fn close(&mut self);
}

/// Sequential read handle produced by [`Channel::open_read`].
#[async_trait]
pub trait RemoteReader: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` means end of file.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Release the remote handle.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Sequential write handle produced by [`Channel::open_write`].
#[async_trait]
pub trait RemoteWriter: Send {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    /// Flush and release the remote handle. Data is not durable until
    /// this returns.
    async fn close(&mut self) -> Result<(), TransportError>;
}
