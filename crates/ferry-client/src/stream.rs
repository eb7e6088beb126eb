//! Raw remote read stream
//!
//! Long sequential reads (progressive download, media playback) run on a
//! dedicated channel opened outside the shared channel pool, so one long
//! read never starves short concurrent operations. The channel belongs to
//! the stream alone; closing the stream disconnects it while the pooled
//! session stays up for other callers.

use tracing::debug;

use ferry_core::{ShareError, ShareKey};

use crate::transport::{Channel, RemoteReader};

/// Sequential reader over a dedicated unpooled channel.
///
/// Call [`close`](RemoteStream::close) when done. A stream dropped
/// without closing releases its channel in a background task.
pub struct RemoteStream {
    key: ShareKey,
    path: String,
    size: u64,
    reader: Option<Box<dyn RemoteReader>>,
    channel: Option<Box<dyn Channel>>,
}

impl RemoteStream {
    pub(crate) fn new(
        key: ShareKey,
        path: String,
        size: u64,
        reader: Box<dyn RemoteReader>,
        channel: Box<dyn Channel>,
    ) -> Self {
        Self {
            key,
            path,
            size,
            reader: Some(reader),
            channel: Some(channel),
        }
    }

    /// Object size at open time.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` means end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ShareError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(ShareError::Protocol {
                reason: "stream is closed".into(),
            });
        };
        reader
            .read(buf)
            .await
            .map_err(|e| ShareError::from_transport(e, &self.key, &self.path))
    }

    /// Release the remote handle and disconnect the dedicated channel.
    /// Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            let _ = reader.close().await;
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }
}

impl Drop for RemoteStream {
    fn drop(&mut self) {
        let reader = self.reader.take();
        let channel = self.channel.take();
        if reader.is_none() && channel.is_none() {
            return;
        }
        debug!(path = %self.path, "stream dropped without close, releasing channel in background");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(mut reader) = reader {
                    let _ = reader.close().await;
                }
                if let Some(mut channel) = channel {
                    channel.close().await;
                }
            });
        }
    }
}
