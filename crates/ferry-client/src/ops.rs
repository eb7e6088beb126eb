//! Channel-level remote operations
//!
//! The operation bodies the executor runs under a channel lock. Each
//! takes `&mut dyn Channel`, speaks [`TransportError`], and leaves
//! classification and retry to the executor. Reads and writes move data
//! in [`CHUNK_SIZE`] pieces; progress is reported once per chunk.

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

use ferry_core::path;
use ferry_core::{EntryType, ErrorClass, StatusCode, TransportError, CHUNK_SIZE};

use crate::progress::ProgressReporter;
use crate::transport::Channel;

/// Source for a streamed upload. Boxed and behind a lock so the closure
/// the executor reruns on an acquisition retry can share one reader.
pub(crate) type SharedSource = Mutex<Box<dyn AsyncRead + Unpin + Send>>;

fn is_dot(name: &str) -> bool {
    name == "." || name == ".."
}

/// List the files under `root`, flat or depth-first recursive.
///
/// Directories are traversed, never returned; `.` and `..` are skipped.
/// Entries are visited in name order, so the result is deterministic for
/// a given tree. Symlinks are reported as files and not followed.
pub(crate) async fn list_files(
    channel: &mut dyn Channel,
    root: &str,
    recursive: bool,
) -> Result<Vec<String>, TransportError> {
    let mut files = Vec::new();
    if recursive {
        walk(channel, root, &mut files).await?;
    } else {
        let mut entries = channel.read_dir(root).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in entries {
            if is_dot(&entry.name) || entry.entry_type == EntryType::Directory {
                continue;
            }
            files.push(path::join(root, &entry.name));
        }
    }
    Ok(files)
}

fn walk<'a>(
    channel: &'a mut dyn Channel,
    dir: &'a str,
    files: &'a mut Vec<String>,
) -> BoxFuture<'a, Result<(), TransportError>> {
    Box::pin(async move {
        let mut entries = channel.read_dir(dir).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in entries {
            if is_dot(&entry.name) {
                continue;
            }
            let full = path::join(dir, &entry.name);
            if entry.entry_type == EntryType::Directory {
                walk(&mut *channel, &full, &mut *files).await?;
            } else {
                files.push(full);
            }
        }
        Ok(())
    })
}

/// Read the whole object at `path`, stopping early at `max_bytes`.
pub(crate) async fn read_all(
    channel: &mut dyn Channel,
    path: &str,
    max_bytes: Option<u64>,
) -> Result<Vec<u8>, TransportError> {
    let mut reader = channel.open_read(path, 0).await?;
    let mut data = Vec::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    let result = loop {
        let want = match max_bytes {
            Some(cap) => {
                let left = cap.saturating_sub(data.len() as u64);
                if left == 0 {
                    break Ok(());
                }
                left.min(CHUNK_SIZE as u64) as usize
            }
            None => CHUNK_SIZE,
        };
        match reader.read(&mut buf[..want]).await {
            Ok(0) => break Ok(()),
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(e) => break Err(e),
        }
    };

    let closed = reader.close().await;
    result.and(closed).map(|_| data)
}

/// Read up to `length` bytes starting at `offset`.
///
/// A range past end of file yields a short (possibly empty) buffer,
/// never an error.
pub(crate) async fn read_range(
    channel: &mut dyn Channel,
    path: &str,
    offset: u64,
    length: u64,
) -> Result<Vec<u8>, TransportError> {
    let mut reader = channel.open_read(path, offset).await?;
    let mut data = Vec::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    let result = loop {
        let left = length.saturating_sub(data.len() as u64);
        if left == 0 {
            break Ok(());
        }
        let want = left.min(CHUNK_SIZE as u64) as usize;
        match reader.read(&mut buf[..want]).await {
            Ok(0) => break Ok(()),
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(e) => break Err(e),
        }
    };

    let closed = reader.close().await;
    result.and(closed).map(|_| data)
}

/// Write `data` to `path`, creating missing parent directories first.
pub(crate) async fn upload_buffer(
    channel: &mut dyn Channel,
    path: &str,
    data: &[u8],
    reporter: &ProgressReporter,
) -> Result<(), TransportError> {
    ensure_parents(channel, path).await?;
    let mut writer = channel.open_write(path).await?;

    let mut result = Ok(());
    for chunk in data.chunks(CHUNK_SIZE) {
        if let Err(e) = writer.write_all(chunk).await {
            result = Err(e);
            break;
        }
        reporter.advance(chunk.len() as u64);
    }

    let closed = writer.close().await;
    result.and(closed)
}

/// Stream `source` to `path`, creating missing parent directories first.
///
/// The source is consumed; the executor never reruns a write body, so it
/// is read at most once.
pub(crate) async fn upload_stream(
    channel: &mut dyn Channel,
    path: &str,
    source: &SharedSource,
    reporter: &ProgressReporter,
) -> Result<(), TransportError> {
    ensure_parents(channel, path).await?;
    let mut writer = channel.open_write(path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];

    let mut result = Ok(());
    loop {
        let read = { source.lock().await.read(&mut buf).await };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                result = Err(TransportError::Io(format!("source read failed: {e}")));
                break;
            }
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            result = Err(e);
            break;
        }
        reporter.advance(n as u64);
    }

    let closed = writer.close().await;
    result.and(closed)
}

/// Create every missing directory above `path`, top-down.
///
/// Losing a creation race is fine: a mkdir that fails because the
/// directory now exists counts as created.
pub(crate) async fn ensure_parents(
    channel: &mut dyn Channel,
    path: &str,
) -> Result<(), TransportError> {
    let Some(parent) = path::parent(path) else {
        return Ok(());
    };
    if parent == "/" {
        return Ok(());
    }

    for dir in path::ancestors(parent) {
        match channel.stat(&dir).await {
            Ok(attrs) if attrs.is_dir() => continue,
            Ok(_) => {
                return Err(TransportError::status(
                    StatusCode::Failure,
                    format!("{dir} exists and is not a directory"),
                ))
            }
            Err(e) if e.class() == ErrorClass::NotFound => match channel.mkdir(&dir).await {
                Ok(()) => {}
                Err(e) if e.class() == ErrorClass::AlreadyExists => {}
                Err(e) => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Delete the directory at `path` and everything under it, children
/// before parents.
pub(crate) fn delete_tree<'a>(
    channel: &'a mut dyn Channel,
    path: &'a str,
) -> BoxFuture<'a, Result<(), TransportError>> {
    Box::pin(async move {
        let entries = channel.read_dir(path).await?;
        for entry in entries {
            if is_dot(&entry.name) {
                continue;
            }
            let child = path::join(path, &entry.name);
            if entry.entry_type == EntryType::Directory {
                delete_tree(&mut *channel, &child).await?;
            } else {
                channel.remove_file(&child).await?;
            }
        }
        channel.remove_dir(path).await
    })
}
