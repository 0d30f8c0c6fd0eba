//! Core data types used throughout backup-chk
//!
//! This module contains the data structures shared by the walker, the
//! comparator, the checker loop and the report sinks:
//!
//! - **Addressing**: [`RootPair`] - a reference root and the backup root it is checked against
//! - **Outcomes**: [`Outcome`], [`Mismatch`], [`MismatchKind`] - the per-item verdict
//! - **Progress**: [`Progress`], [`CheckSummary`] - counters owned by one walk
//! - **Configuration**: [`CheckConfig`] - tunables, loadable from `config.json`
//!
//! ## Examples
//!
//! ```rust
//! use backup_chk::types::RootPair;
//!
//! let pair = RootPair::parse("/Users/:/Volumes/Backup/Users").unwrap();
//! assert_eq!(pair.reference.to_str(), Some("/Users/"));
//! assert_eq!(pair.backup.to_str(), Some("/Volumes/Backup/Users"));
//! ```

use crate::error::{CheckError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of directory entries fetched per enumeration batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default size of the chunks compared in lockstep
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// A reference root and the backup root it is verified against
///
/// The walker only ever enumerates the reference root; every reference item
/// is mapped into the backup root by joining its relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPair {
    /// Authoritative tree
    pub reference: PathBuf,
    /// Tree being verified
    pub backup: PathBuf,
}

impl RootPair {
    /// Create a pair from two paths
    pub fn new(reference: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Self {
        Self {
            reference: reference.into(),
            backup: backup.into(),
        }
    }

    /// Parse a `REFERENCE_DIR:BACKUP_DIR` argument
    ///
    /// Exactly one `:` is accepted and neither side may be empty.
    pub fn parse(arg: &str) -> Result<Self> {
        let parts: Vec<&str> = arg.split(':').collect();
        match parts.as_slice() {
            [reference, backup] if !reference.is_empty() && !backup.is_empty() => {
                Ok(Self::new(*reference, *backup))
            }
            _ => Err(CheckError::MalformedPair(arg.to_string())),
        }
    }
}

impl fmt::Display for RootPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reference.display(), self.backup.display())
    }
}

/// What diverged between a reference item and its backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MismatchKind {
    /// One side is a directory, the other is not
    IsDirectory,
    /// Permission or file-type bits differ
    Mode,
    /// Exactly one side is a symbolic link
    Symlink,
    /// Both are symlinks with different targets
    SymlinkTarget,
    /// Regular files of different length
    Size,
    /// Content differs in the chunk starting at `offset`
    Chunk {
        /// Byte offset of the first differing chunk
        offset: u64,
    },
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchKind::IsDirectory => write!(f, "is-directory mismatch"),
            MismatchKind::Mode => write!(f, "mode mismatch"),
            MismatchKind::Symlink => write!(f, "symlink-ness mismatch"),
            MismatchKind::SymlinkTarget => write!(f, "symlink target mismatch"),
            MismatchKind::Size => write!(f, "size mismatch"),
            MismatchKind::Chunk { offset } => write!(f, "chunk mismatch at offset {}", offset),
        }
    }
}

/// A reported divergence, carrying both observed values
///
/// # Examples
///
/// ```rust
/// # use backup_chk::types::{Mismatch, MismatchKind};
/// let m = Mismatch {
///     path: "dir1/file2".to_string(),
///     kind: MismatchKind::Size,
///     reference: "5".to_string(),
///     backup: "6".to_string(),
/// };
/// assert_eq!(m.to_string(), "dir1/file2: size mismatch: reference 5 != backup 6");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Relative path shared by both items
    pub path: String,
    /// What diverged
    #[serde(flatten)]
    pub kind: MismatchKind,
    /// Value observed on the reference side
    pub reference: String,
    /// Value observed on the backup side
    pub backup: String,
}

impl Mismatch {
    /// The reason without the path prefix
    pub fn reason(&self) -> String {
        format!(
            "{}: reference {} != backup {}",
            self.kind, self.reference, self.backup
        )
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason())
    }
}

/// Verdict of comparing one reference item against its backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The backup is considered faithful (or not yet due)
    Equivalent,
    /// The backup diverges
    Mismatch(Mismatch),
}

impl Outcome {
    /// Whether this outcome is [`Outcome::Equivalent`]
    pub fn is_equivalent(&self) -> bool {
        matches!(self, Outcome::Equivalent)
    }
}

/// Aggregate counters for one walk, handed to report sinks periodically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    /// Items compared so far
    pub items_checked: u64,
    /// Mismatches reported so far
    pub mismatches: u64,
    /// Bytes read by content comparison so far
    pub bytes_read: u64,
    /// Time since the walk started
    pub elapsed: Duration,
    /// Relative path of the item last compared
    pub current: Option<String>,
}

impl Progress {
    /// Content throughput in bytes per second
    pub fn bytes_per_sec(&self) -> f64 {
        per_sec(self.bytes_read, self.elapsed)
    }

    /// Items compared per second
    pub fn items_per_sec(&self) -> f64 {
        per_sec(self.items_checked, self.elapsed)
    }
}

fn per_sec(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Result of checking one root pair to completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    /// Reference root that was walked
    pub reference_root: PathBuf,
    /// Backup root items were mapped into
    pub backup_root: PathBuf,
    /// Items compared
    pub items_checked: u64,
    /// Mismatches reported
    pub mismatches: u64,
    /// Bytes read by content comparison
    pub bytes_read: u64,
    /// Wall time of this walk in milliseconds
    pub elapsed_ms: u64,
    /// When the walk started
    pub started_at: DateTime<Utc>,
    /// Whether pending work was loaded from a previous run
    pub resumed: bool,
    /// Session log holding the mismatches, if one was written
    pub session_log: Option<PathBuf>,
}

impl CheckSummary {
    /// True when no mismatch was reported
    pub fn is_clean(&self) -> bool {
        self.mismatches == 0
    }

    /// Get a one-line summary of the check
    pub fn summary(&self) -> String {
        format!(
            "{} checked, {} errors, {} bytes in {}ms{}",
            self.items_checked,
            self.mismatches,
            self.bytes_read,
            self.elapsed_ms,
            if self.resumed { " (resumed)" } else { "" }
        )
    }
}

/// Tunables for a check
///
/// Loaded from `config.json` in the configuration directory when present;
/// missing fields take their defaults.
///
/// ```rust
/// # use backup_chk::types::CheckConfig;
/// let config: CheckConfig = serde_json::from_str(r#"{ "exclude": [".Trash"] }"#).unwrap();
/// assert_eq!(config.exclude, vec![".Trash".to_string()]);
/// assert_eq!(config.chunk_size, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Exclude patterns (`*` wildcards, matched against relative paths)
    pub exclude: Vec<String>,
    /// Directory entries fetched per enumeration batch
    pub batch_size: usize,
    /// Bytes compared per chunk
    pub chunk_size: usize,
    /// Milliseconds between progress reports
    pub progress_interval_ms: u64,
    /// Seconds between traversal log checkpoints (0 disables)
    pub flush_interval_secs: u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval_ms: 3000,
            flush_interval_secs: 60,
        }
    }
}

impl CheckConfig {
    /// Name of the configuration file inside the configuration directory
    pub const FILE_NAME: &'static str = "config.json";

    /// Load `config.json` from `config_dir`, or defaults if it does not exist
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the walker and comparator cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CheckError::InvalidConfiguration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(CheckError::InvalidConfiguration(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
