//! Ferry Client - Pooled access to remote file shares
//!
//! This crate provides:
//! - A process-wide connection pool keyed by `(host, port, username)`
//! - Bounded channel multiplexing over each pooled session
//! - An operation executor with failure classification and one
//!   transparent retry against a fresh channel, or a fresh session when
//!   the old one died
//! - Remote file operations: list, read, range read, upload, download,
//!   stat, mkdir, delete, rename, and raw streams
//!
//! # Architecture
//!
//! Every operation flows through the same path:
//!
//! ```text
//! caller
//!   │
//!   ▼
//! ShareClient ──────────── path validation, chunking, progress
//!   │
//!   ▼
//! Executor ─────────────── admission permit, classify, retry once
//!   │
//!   ▼
//! ConnectionPool ───────── one live session per ShareKey
//!   │
//!   ▼
//! ChannelPool ──────────── bounded channels, one mutex each
//!   │
//!   ▼
//! Transport / Session / Channel (protocol implementation)
//! ```
//!
//! The admission semaphore bounds concurrently executing operations
//! across the whole pool. The per-session channel cap bounds parallelism
//! within one session; once reached, extra callers serialize on an
//! existing channel's lock instead of opening more.
//!
//! Sessions idle past the configured timeout are evicted by the reaper,
//! periodically or opportunistically after a stream open.

pub mod channel_pool;
pub mod client;
pub mod connection_pool;
pub mod executor;
mod ops;
pub mod progress;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{ClientStats, ShareClient};
pub use connection_pool::{ConnectionPool, ConnectionPoolStatsSnapshot};
pub use progress::ProgressCallback;
pub use stream::RemoteStream;
pub use transport::{Channel, RemoteReader, RemoteWriter, Session, Transport};

// Core types callers need alongside the client.
pub use ferry_core::{
    Config, Credentials, EntryType, ErrorClass, FileAttributes, RemoteEntry, ShareError, ShareKey,
    ShareTarget, StatusCode, TransportError,
};
