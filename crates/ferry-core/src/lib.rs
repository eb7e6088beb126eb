//! Ferry Core - Shared types, errors, and configuration
//!
//! This crate contains the foundational types used across all Ferry
//! components. It has no dependencies on networking code.

pub mod config;
pub mod error;
pub mod path;
pub mod types;

pub use config::{Config, ConfigError, NetworkConfig, PoolConfig, TransferConfig};
pub use error::{ErrorClass, ShareError, StatusCode, TransportError};
pub use types::*;

/// Transfer buffer size in bytes (64 KB); also the progress cadence
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Maximum remote path length in bytes
pub const MAX_PATH_LEN: usize = 4096;

/// Default remote-share port
pub const DEFAULT_PORT: u16 = 22;
