//! Core type definitions for Ferry
//!
//! These types identify remote shares and describe remote filesystem
//! entries. They carry no networking code.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identity of a pooled connection: one share endpoint as one user.
///
/// Two callers holding equal keys may share a live session. Secrets are
/// deliberately not part of the key; they only matter when a session has
/// to be (re)built.
#[derive(Clone, Hash, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct ShareKey {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl ShareKey {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }
}

impl std::fmt::Display for ShareKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Authentication material for building a session.
///
/// The client is polymorphic over the two modes and otherwise identical.
#[derive(Clone, Serialize, Deserialize)]
pub enum Credentials {
    /// Plain password authentication
    Password(String),
    /// Private-key authentication with an optional passphrase
    PrivateKey {
        key: String,
        passphrase: Option<String>,
    },
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(password.into())
    }

    pub fn private_key(key: impl Into<String>, passphrase: Option<String>) -> Self {
        Self::PrivateKey {
            key: key.into(),
            passphrase,
        }
    }

    /// Label for logging. Never exposes secret material.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::PrivateKey { .. } => "private-key",
        }
    }
}

// Secrets must not leak through logs or panic messages.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Credentials::Password(***)"),
            Self::PrivateKey { passphrase, .. } => f
                .debug_struct("Credentials::PrivateKey")
                .field("key", &"***")
                .field("passphrase", &passphrase.as_ref().map(|_| "***"))
                .finish(),
        }
    }
}

/// Everything needed to reach a share: identity plus secret.
///
/// Produced by the credential store; consumed by every client call.
/// Pooling looks only at `key`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShareTarget {
    pub key: ShareKey,
    pub credentials: Credentials,
}

impl ShareTarget {
    pub fn new(key: ShareKey, credentials: Credentials) -> Self {
        Self { key, credentials }
    }
}

/// Type of remote filesystem entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryType {
    File = 0,
    Directory = 1,
    Symlink = 2,
}

/// Remote file attributes (similar to struct stat)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileAttributes {
    pub entry_type: EntryType,
    pub size: u64,
    /// Modification time, unix seconds
    pub mtime: u64,
    /// Access time, unix seconds
    pub atime: u64,
}

impl FileAttributes {
    /// Create attributes for a directory
    pub fn directory() -> Self {
        let now = unix_now();
        Self {
            entry_type: EntryType::Directory,
            size: 0,
            mtime: now,
            atime: now,
        }
    }

    /// Create attributes for a file
    pub fn file(size: u64) -> Self {
        let now = unix_now();
        Self {
            entry_type: EntryType::File,
            size,
            mtime: now,
            atime: now,
        }
    }

    pub const fn is_dir(&self) -> bool {
        matches!(self.entry_type, EntryType::Directory)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// One entry of a remote directory listing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Bare name within the directory, no path separators
    pub name: String,
    pub entry_type: EntryType,
    pub size: u64,
}

impl RemoteEntry {
    pub fn new(name: impl Into<String>, entry_type: EntryType, size: u64) -> Self {
        Self {
            name: name.into(),
            entry_type,
            size,
        }
    }

    pub const fn is_dir(&self) -> bool {
        matches!(self.entry_type, EntryType::Directory)
    }
}
