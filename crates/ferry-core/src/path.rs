//! Remote path utilities
//!
//! Share paths are absolute POSIX-style strings owned by the remote side;
//! they are never resolved against the local filesystem. These helpers
//! normalize caller input and decompose paths for directory walks.

use crate::MAX_PATH_LEN;

/// Validate a caller-supplied remote path.
///
/// Remote paths must be absolute, free of NUL bytes, and within the
/// protocol length limit. `.` and `..` segments are rejected rather than
/// resolved; the remote side is the only authority on link structure.
pub fn validate(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if !path.starts_with('/') {
        return Err(PathError::NotAbsolute(path.to_string()));
    }
    if path.contains('\0') {
        return Err(PathError::NulByte);
    }
    if path.len() > MAX_PATH_LEN {
        return Err(PathError::TooLong(path.len()));
    }
    for segment in path.split('/') {
        if segment == "." || segment == ".." {
            return Err(PathError::DotSegment(path.to_string()));
        }
    }
    Ok(())
}

/// Collapse duplicate separators and strip any trailing slash.
///
/// `"/"` stays `"/"`; `"//videos//show/"` becomes `"/videos/show"`.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// Join a directory path and a bare entry name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Parent directory of a normalized path. `"/"` has no parent.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.trim_end_matches('/').rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Final component of a normalized path, if any.
pub fn file_name(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    trimmed.rfind('/').map(|idx| &trimmed[idx + 1..])
}

/// All ancestor directories of `path` from the top down, ending with
/// `path` itself. The root is never included.
///
/// `"/a/b/c"` yields `["/a", "/a/b", "/a/b/c"]`; used to create missing
/// directory chains in order.
pub fn ancestors(path: &str) -> Vec<String> {
    let normalized = normalize(path);
    if normalized == "/" {
        return Vec::new();
    }
    let mut chain = Vec::new();
    let mut current = String::new();
    for segment in normalized.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        chain.push(current.clone());
    }
    chain
}

/// Remote path errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Empty path
    Empty,
    /// Path does not start with '/'
    NotAbsolute(String),
    /// Path contains a NUL byte
    NulByte,
    /// Path exceeds the protocol length limit
    TooLong(usize),
    /// Path contains a '.' or '..' segment
    DotSegment(String),
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::Empty => write!(f, "empty path"),
            PathError::NotAbsolute(p) => write!(f, "path is not absolute: {}", p),
            PathError::NulByte => write!(f, "path contains NUL byte"),
            PathError::TooLong(len) => {
                write!(f, "path too long: {} bytes (max {})", len, MAX_PATH_LEN)
            }
            PathError::DotSegment(p) => write!(f, "path contains dot segment: {}", p),
        }
    }
}

impl std::error::Error for PathError {}
