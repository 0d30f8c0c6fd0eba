//! Error types for backup-chk
//!
//! This module defines the errors that can abort a check. A content or
//! metadata divergence between the reference and the backup is *not* an
//! error: it is reported as [`Outcome::Mismatch`](crate::types::Outcome) and
//! the walk carries on. Everything in [`CheckError`] either prevents a walk
//! from starting (bad roots, bad arguments) or ends the current walk after
//! the traversal log has been flushed.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in backup-chk
pub type Result<T> = std::result::Result<T, CheckError>;

/// Main error type for all backup-chk operations
#[derive(Debug, Error)]
pub enum CheckError {
    /// I/O errors not attributable to a specific tree item
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Errors reading or writing JSON configuration and summaries
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A supplied root, or an item being enumerated, is not a directory
    #[error("not a directory: {path:?}")]
    NotADirectory {
        /// Offending path
        path: PathBuf,
    },

    /// `read_link` was requested on something that is not a symlink
    #[error("not a symbolic link: {path:?}")]
    NotASymlink {
        /// Offending path
        path: PathBuf,
    },

    /// lstat failed
    #[error("cannot stat {path:?}: {source}")]
    Stat {
        /// Path that could not be stat'ed
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// open failed
    #[error("cannot open {path:?}: {source}")]
    Open {
        /// Path that could not be opened
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// read failed part way through a comparison
    #[error("cannot read {path:?}: {source}")]
    Read {
        /// Path being read
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Directory enumeration failed
    #[error("cannot list directory {path:?}: {source}")]
    ReadDir {
        /// Directory being enumerated
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A `REFERENCE_DIR:BACKUP_DIR` argument could not be parsed
    #[error("invalid REFERENCE_DIR:BACKUP_DIR pair: {0}")]
    MalformedPair(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The traversal log could not be truncated or rewritten
    #[error("cannot flush traversal log {path:?}: {source}")]
    LogFlush {
        /// Location of the traversal log
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The walk was stopped by an interrupt or termination signal
    #[error("interrupted")]
    Interrupted,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        CheckError::Internal(msg.into())
    }

    /// Build a stat error, keeping the OS error kind
    pub(crate) fn stat(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CheckError::Stat { path: path.into(), source }
    }

    /// Build an open error
    pub(crate) fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CheckError::Open { path: path.into(), source }
    }

    /// Build a read error
    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CheckError::Read { path: path.into(), source }
    }

    /// Errors that are detected before any walking begins
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            CheckError::NotADirectory { .. }
                | CheckError::MalformedPair(_)
                | CheckError::InvalidConfiguration(_)
        )
    }

    /// Errors that abort the current walk
    ///
    /// Log flush failures are the only error the walk survives; they are
    /// logged and resume guarantees are lost for the run.
    pub fn is_fatal_for_walk(&self) -> bool {
        !matches!(self, CheckError::LogFlush { .. })
    }

    /// The OS error kind behind this error, if any
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            CheckError::Io(e) => Some(e.kind()),
            CheckError::Stat { source, .. }
            | CheckError::Open { source, .. }
            | CheckError::Read { source, .. }
            | CheckError::ReadDir { source, .. }
            | CheckError::LogFlush { source, .. } => Some(source.kind()),
            _ => None,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            CheckError::MalformedPair(arg) => {
                format!(
                    "invalid REFERENCE_DIR:BACKUP_DIR pair: {} (hint: /Users/:/Volumes/Backup/Users)",
                    arg
                )
            }
            CheckError::NotADirectory { path } => {
                format!("{:?} is not a directory. Both sides of a pair must be directories.", path)
            }
            CheckError::Stat { path, source } if source.kind() == io::ErrorKind::PermissionDenied => {
                format!(
                    "Permission denied for {:?}. Check file permissions or run with appropriate privileges.",
                    path
                )
            }
            CheckError::Interrupted => {
                "Interrupted. Progress was saved; run the same command again to resume.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
