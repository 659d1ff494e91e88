//! Error types for the analysis engine.
//!
//! Errors live at two levels:
//!
//! - [`AnalysisError`] attaches to a single file's result. It is `Clone` and
//!   serializable so it can travel back from worker processes, and it never
//!   aborts sibling files.
//! - [`EngineError`] covers the few failures that prevent an engine from being
//!   constructed at all (invalid configuration, unusable cache directory,
//!   unavailable runner).
//!
//! # Example
//!
//! ```rust
//! use metricore::errors::{AnalysisError, ErrorKind};
//! use std::time::Duration;
//!
//! let io_err = AnalysisError::io("src/lib.rs", "permission denied");
//! assert_eq!(io_err.kind(), ErrorKind::Io);
//!
//! let timeout = AnalysisError::timeout(Duration::from_secs(30));
//! assert!(timeout.is_batch_failure());
//! ```

use crate::cache::CacheError;
use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-file analysis error.
///
/// # Categories
///
/// - `Io`: the file could not be read
/// - `Parse`: the runner rejected the file
/// - `Timeout`: the batch containing the file exceeded its deadline
/// - `WorkerCrash`: the worker executing the batch died
/// - `Cancelled`: the run was cancelled before the file was dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisError {
    /// File system I/O errors (read, permissions, missing file)
    Io { path: PathBuf, message: String },
    /// Runner-reported failure for one file
    Parse { path: PathBuf, message: String },
    /// Batch exceeded its deadline
    Timeout { elapsed_ms: u64 },
    /// Pool-level fatal fault (panic, killed process, broken pipe)
    WorkerCrash { message: String },
    /// Run was cancelled before this file was dispatched
    Cancelled,
}

/// Coarse classification of an [`AnalysisError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Io,
    Parse,
    Timeout,
    WorkerCrash,
    Cancelled,
}

impl AnalysisError {
    /// Create an I/O error for a path.
    pub fn io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error from a `std::io::Error`.
    pub fn from_io(path: &Path, error: &std::io::Error) -> Self {
        Self::io(path, error.to_string())
    }

    /// Create a parse error for a path.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error for a batch that ran for `elapsed`.
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout {
            elapsed_ms: elapsed.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    /// Create a worker crash error.
    pub fn worker_crash(message: impl Into<String>) -> Self {
        Self::WorkerCrash {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::WorkerCrash { .. } => ErrorKind::WorkerCrash,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Get the associated path, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Io { path, .. } | Self::Parse { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Whether this error describes a whole batch rather than one file.
    ///
    /// Batch failures are retried once through the sequential fallback.
    pub fn is_batch_failure(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::WorkerCrash { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Io => "I/O",
            ErrorKind::Parse => "Parse",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::WorkerCrash => "WorkerCrash",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "I/O error: {} (path: {})", message, path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "Parse error: {} in {}", message, path.display())
            }
            Self::Timeout { elapsed_ms } => {
                write!(f, "Batch timed out after {} ms", elapsed_ms)
            }
            Self::WorkerCrash { message } => write!(f, "Worker crashed: {}", message),
            Self::Cancelled => write!(f, "Analysis cancelled"),
        }
    }
}

impl std::error::Error for AnalysisError {}

/// Errors that prevent an engine from starting.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Cache store could not be opened
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The supplied runner reports itself unavailable
    #[error("runner `{name}` is not available")]
    RunnerUnavailable { name: String },
}
