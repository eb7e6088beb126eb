//! Error types for the Ferry client
//!
//! Transports resolve every protocol-level outcome into a fixed
//! [`StatusCode`] once, at the transport boundary. Retry decisions match on
//! [`ErrorClass`] only; no layer inspects human-readable status text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol status codes, resolved at the transport boundary.
///
/// Numbering follows the SSH file-transfer status space so existing
/// transports can map without translation tables; transports for other
/// protocols resolve their native statuses into the nearest code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum StatusCode {
    // Success / stream state (0-1)
    Ok = 0,
    Eof = 1,

    // File-level failures (2-3)
    NoSuchFile = 2,
    PermissionDenied = 3,

    // Generic failure (4)
    Failure = 4,

    // Channel/session state (5-8)
    BadMessage = 5,
    NoConnection = 6,
    ConnectionLost = 7,
    OpUnsupported = 8,

    // Extended file-level failures (11-15)
    AlreadyExists = 11,
    NoSpace = 14,
    QuotaExceeded = 15,
}

impl StatusCode {
    /// Status codes that indicate the channel is in a bad state rather
    /// than the request being wrong.
    pub const fn is_channel_fault(self) -> bool {
        matches!(
            self,
            StatusCode::BadMessage | StatusCode::NoConnection | StatusCode::ConnectionLost
        )
    }
}

/// Failures surfaced by a transport implementation.
///
/// Everything the executor needs for classification is structural; the
/// message strings are for logs only.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("remote status {code:?}: {message}")]
    Status { code: StatusCode, message: String },

    #[error("stream truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: u64, got: u64 },

    #[error("session or channel closed")]
    Closed,
}

impl TransportError {
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Classify for retry policy. The single classification point.
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::Auth(_) => ErrorClass::Auth,
            TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Io(_) => {
                ErrorClass::Network
            }
            TransportError::Truncated { .. } | TransportError::Closed => ErrorClass::Corruption,
            TransportError::Status { code, .. } => match code {
                c if c.is_channel_fault() => ErrorClass::Corruption,
                StatusCode::NoSuchFile => ErrorClass::NotFound,
                StatusCode::PermissionDenied => ErrorClass::Permission,
                StatusCode::AlreadyExists => ErrorClass::AlreadyExists,
                StatusCode::NoSpace | StatusCode::QuotaExceeded => ErrorClass::Quota,
                _ => ErrorClass::Other,
            },
        }
    }
}

/// Classification driving the executor's retry decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credentials rejected. Fatal, never retried.
    Auth,
    /// Unreachable host, connect timeout, socket timeout. Retried once via
    /// a fresh connection for idempotent operations.
    Network,
    /// Channel (not necessarily session) in a bad state: channel-fault
    /// status codes, truncated streams, closed handles.
    Corruption,
    /// Target path absent. Never retried; `exists()` maps this to `false`.
    NotFound,
    Permission,
    AlreadyExists,
    Quota,
    /// Remaining protocol/business failures. Never retried.
    Other,
}

impl ErrorClass {
    /// Classes that justify discarding the failing channel and retrying
    /// once. The session itself goes only if it died too.
    pub const fn is_recoverable(self) -> bool {
        matches!(self, ErrorClass::Network | ErrorClass::Corruption)
    }
}

/// Failures returned to callers. Nothing above the executor sees a raw
/// [`TransportError`].
#[derive(Error, Debug)]
pub enum ShareError {
    #[error("authentication failed for {target}: {reason}")]
    Auth { target: String, reason: String },

    #[error("network failure: {reason}")]
    Network { reason: String },

    #[error("channel corrupted: {reason}")]
    ChannelCorrupted { reason: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    #[error("quota exceeded writing {path}")]
    QuotaExceeded { path: String },

    #[error("protocol failure: {reason}")]
    Protocol { reason: String },

    /// Rejected before any network activity.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Local stream failure while moving data to or from the caller.
    #[error("local i/o failure: {reason}")]
    Io { reason: String },

    #[error("client is shut down")]
    PoolClosed,
}

impl ShareError {
    /// Convert a transport failure into the caller-facing taxonomy.
    ///
    /// `target` is the pooled identity (safe to display), `path` the remote
    /// path the operation addressed.
    pub fn from_transport(err: TransportError, target: &crate::ShareKey, path: &str) -> Self {
        let class = err.class();
        match class {
            ErrorClass::Auth => ShareError::Auth {
                target: target.to_string(),
                reason: err.to_string(),
            },
            ErrorClass::Network => ShareError::Network {
                reason: err.to_string(),
            },
            ErrorClass::Corruption => ShareError::ChannelCorrupted {
                reason: err.to_string(),
            },
            ErrorClass::NotFound => ShareError::NotFound {
                path: path.to_string(),
            },
            ErrorClass::Permission => ShareError::PermissionDenied {
                path: path.to_string(),
            },
            ErrorClass::AlreadyExists => ShareError::AlreadyExists {
                path: path.to_string(),
            },
            ErrorClass::Quota => ShareError::QuotaExceeded {
                path: path.to_string(),
            },
            ErrorClass::Other => ShareError::Protocol {
                reason: err.to_string(),
            },
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, ShareError::NotFound { .. })
    }
}
