//! # backup-chk - Verify backup trees against their originals
//!
//! Walks a reference directory tree and checks, item by item, that a backup
//! tree holds the same thing at the same relative path. Walks over millions
//! of files survive interruption: the pending work is persisted and the next
//! run picks up where the last one stopped.
//!
//! ## Overview
//!
//! - **Lazy items**: [`FsItem`] stats, resolves and opens on demand, at most once
//! - **Excludes**: [`ExcludeMatcher`] prunes subtrees with `*` patterns
//! - **Resumable walk**: [`TreeWalker`] is a depth-first stack persisted to a
//!   [`TraversalLog`]
//! - **Comparison**: [`Comparator`] decides equivalence from metadata, then
//!   content in fixed-size chunks
//! - **Reporting**: results flow to a [`ReportSink`]
//!
//! Only the reference tree is ever enumerated. Each reference item is mapped
//! into the backup by joining its relative path onto the backup root, so
//! extra files in the backup are not reported.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backup_chk::{BackupChecker, CollectingSink, RootPair};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let checker = BackupChecker::builder()
//!     .exclude_patterns(vec![".Trash".to_string(), "Library/Cache".to_string()])
//!     .build()?;
//!
//! let mut sink = CollectingSink::new();
//! let summary = checker.check_pair(&RootPair::parse("/Users/:/Volumes/Backup/Users")?, &mut sink)?;
//!
//! for mismatch in &sink.mismatches {
//!     println!("{}", mismatch);
//! }
//! println!("{}", summary.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Equivalence
//!
//! A backup item is considered faithful when, in order:
//!
//! - the reference was modified after the backup (not due yet), or
//! - both are directories, or
//! - mode bits match and both are symlinks with the same target, or
//! - mode bits and sizes match and the contents are byte-identical
//!
//! Everything else is an [`Outcome::Mismatch`] carrying both observed values.
//! Stat, open and read failures are errors, not mismatches: an unreadable
//! item aborts the walk rather than silently passing.
//!
//! ## State
//!
//! Per reference root, state lives in
//! `<config dir>/run-status/<escaped root>/`:
//!
//! - `walk-stack`: the pending stack, one relative path per line
//! - `log.txt`: timestamped mismatches of every run
//!
//! ## Module Organization
//!
//! - [`item`]: lazily stat'ed filesystem items
//! - [`exclude`]: exclude patterns
//! - [`traversal_log`] and [`walker`]: the resumable walk
//! - [`comparator`]: per-item comparison
//! - [`report`]: result sinks
//! - [`checker`]: the per-pair loop and its builder
//! - [`shutdown`]: SIGINT/SIGTERM handling
//! - [`types`]: common types and configuration
//! - [`error`]: error types and handling

// Public API modules
pub mod checker;
pub mod comparator;
pub mod error;
pub mod exclude;
pub mod item;
pub mod report;
pub mod shutdown;
pub mod traversal_log;
pub mod types;
pub mod utils;
pub mod walker;

// Re-export main types for convenience
pub use checker::{BackupChecker, BackupCheckerBuilder};
pub use comparator::Comparator;
pub use error::{CheckError, Result};
pub use exclude::{ExcludeMatcher, MACOS_EXCLUDES};
pub use item::{FsItem, ItemKind, ItemMeta};
pub use report::{CollectingSink, ReportSink, SessionLogSink};
pub use shutdown::ShutdownSignal;
pub use traversal_log::TraversalLog;
pub use types::*;
pub use walker::TreeWalker;
