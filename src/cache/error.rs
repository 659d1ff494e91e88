//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// Reads are fail-safe: a damaged entry is a cache miss, never an error.
/// These variants surface from writes, checkpoints, and opening the store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The journal or snapshot failed validation.
    #[error("cache corruption in {}: {reason}", .path.display())]
    Corruption { path: PathBuf, reason: String },

    /// A record or payload could not be encoded or decoded.
    #[error("cache serialization error: {reason}")]
    Serialization { reason: String },

    /// Payload compression or decompression failed.
    #[error("cache compression error: {reason}")]
    Compression { reason: String },

    /// Another store kept the directory locked for the whole wait.
    #[error(
        "cache directory is in use by another process ({} still locked after {waited_ms} ms)",
        .path.display()
    )]
    Locked { path: PathBuf, waited_ms: u64 },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::io(
            "/tmp/cache/store.journal",
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        );
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("store.journal"));
    }

    #[test]
    fn corruption_display() {
        let err = CacheError::corruption("store.snap", "bad magic");
        assert!(err.is_corruption());
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn locked_display() {
        let err = CacheError::Locked {
            path: PathBuf::from("/tmp/cache/store.lock"),
            waited_ms: 250,
        };
        let msg = err.to_string();
        assert!(msg.contains("in use by another process"));
        assert!(msg.contains("250 ms"));
        assert!(!err.is_corruption());
    }

    #[test]
    fn serialization_error_display() {
        let err = CacheError::Serialization {
            reason: "unexpected end of input".to_string(),
        };
        assert!(err.to_string().contains("unexpected end of input"));
        assert!(!err.is_corruption());
    }
}
