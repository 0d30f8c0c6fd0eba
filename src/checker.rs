//! Per-pair verification loop
//!
//! [`BackupChecker`] ties the pieces together for one `REFERENCE:BACKUP`
//! pair:
//!
//! 1. both roots are normalized and must be directories
//! 2. the state directory `<config>/run-status/<escaped reference root>` is
//!    created, and a [`TreeWalker`] is opened on it (resuming if a traversal
//!    log is left over)
//! 3. every yielded reference item is mapped into the backup root and handed
//!    to the [`Comparator`]; verdicts go to the [`ReportSink`]
//! 4. the walker is closed on every exit path, so the pending stack is on disk
//!    whether the walk drained, failed or was interrupted
//!
//! The roots themselves are validated up front and are not reported as
//! checked items.
//!
//! ## Example
//!
//! ```rust,no_run
//! use backup_chk::{BackupChecker, CollectingSink, RootPair};
//!
//! # fn main() -> backup_chk::Result<()> {
//! let checker = BackupChecker::builder()
//!     .config_dir("/tmp/backup-chk")
//!     .exclude_patterns(vec!["Library/Cache".to_string()])
//!     .build()?;
//!
//! let mut sink = CollectingSink::new();
//! let summary = checker.check_pair(&RootPair::parse("/Users:/Volumes/Backup/Users")?, &mut sink)?;
//! println!("{}", summary.summary());
//! # Ok(())
//! # }
//! ```

use crate::comparator::Comparator;
use crate::error::Result;
use crate::exclude::ExcludeMatcher;
use crate::item::FsItem;
use crate::report::{ReportSink, SessionLogSink, SESSION_LOG_FILE};
use crate::shutdown::ShutdownSignal;
use crate::traversal_log::TraversalLog;
use crate::types::{CheckConfig, CheckSummary, Outcome, Progress, RootPair};
use crate::utils;
use crate::walker::TreeWalker;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration directory used when none is given
pub const DEFAULT_CONFIG_DIR: &str = "~/.backup-chk";

/// Sub-directory of the configuration directory holding per-root state
pub const RUN_STATUS_DIR: &str = "run-status";

/// `DEFAULT_CONFIG_DIR` with `~` expanded
pub fn default_config_dir() -> PathBuf {
    utils::expand_user(Path::new(DEFAULT_CONFIG_DIR))
}

/// Verifies backup trees against reference trees
#[derive(Debug, Clone)]
pub struct BackupChecker {
    config_dir: PathBuf,
    config: CheckConfig,
    resume: bool,
    session_log: bool,
    shutdown: ShutdownSignal,
}

impl BackupChecker {
    /// Start configuring a checker
    pub fn builder() -> BackupCheckerBuilder {
        BackupCheckerBuilder::new()
    }

    /// Configuration directory
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Effective configuration
    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Shutdown flag observed by the walk
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// State directory of a reference root
    pub fn state_dir(&self, reference: &Path) -> Result<PathBuf> {
        let normalized = utils::normalize_path(reference)?;
        Ok(self
            .config_dir
            .join(RUN_STATUS_DIR)
            .join(utils::escape_root(&normalized)))
    }

    /// Check one pair to completion
    ///
    /// Mismatches are reported to `sink` and counted; they never fail the
    /// check.
    ///
    /// # Errors
    ///
    /// - [`CheckError::NotADirectory`](crate::CheckError::NotADirectory) or
    ///   [`CheckError::Stat`](crate::CheckError::Stat) if a root is unusable
    /// - any stat, open or read failure on a walked item
    /// - [`CheckError::Interrupted`](crate::CheckError::Interrupted) once the
    ///   shutdown signal fires
    pub fn check_pair(&self, pair: &RootPair, sink: &mut dyn ReportSink) -> Result<CheckSummary> {
        let reference_root = utils::normalize_path(&pair.reference)?;
        let backup_root = utils::normalize_path(&pair.backup)?;
        let reference = FsItem::root(&reference_root)?;
        let backup = FsItem::root(&backup_root)?;

        let state_dir = self.state_dir(&reference_root)?;
        fs::create_dir_all(&state_dir)?;
        if !self.resume {
            debug!("Discarding saved state in {:?}", state_dir);
            TraversalLog::discard(&state_dir)?;
        }

        info!("Checking {} (state in {:?})", pair, state_dir);
        let pair = RootPair::new(reference_root, backup_root);
        if self.session_log {
            let mut tee = SessionLogSink::new(sink);
            self.walk(&pair, &state_dir, reference, backup, &mut tee)
        } else {
            self.walk(&pair, &state_dir, reference, backup, sink)
        }
    }

    /// Check several pairs one after the other, stopping at the first error
    pub fn check_all(
        &self,
        pairs: &[RootPair],
        sink: &mut dyn ReportSink,
    ) -> Result<Vec<CheckSummary>> {
        let mut summaries = Vec::with_capacity(pairs.len());
        for pair in pairs {
            summaries.push(self.check_pair(pair, sink)?);
        }
        Ok(summaries)
    }

    fn walk(
        &self,
        pair: &RootPair,
        state_dir: &Path,
        reference: FsItem,
        backup: FsItem,
        sink: &mut dyn ReportSink,
    ) -> Result<CheckSummary> {
        sink.begin(pair, state_dir)?;

        let started_at = Utc::now();
        let start = Instant::now();
        let exclude = ExcludeMatcher::build(&self.config.exclude);
        let mut walker = TreeWalker::open(reference, state_dir, exclude)?
            .with_batch_size(self.config.batch_size);
        let mut comparator =
            Comparator::new(self.config.chunk_size).with_shutdown(self.shutdown.clone());
        let mut progress = Progress::default();

        let result = self.drive(
            &mut walker,
            &mut comparator,
            backup.root_path(),
            sink,
            &mut progress,
            start,
        );
        walker.close();
        result?;

        let summary = CheckSummary {
            reference_root: pair.reference.clone(),
            backup_root: pair.backup.clone(),
            items_checked: progress.items_checked,
            mismatches: progress.mismatches,
            bytes_read: comparator.bytes_read(),
            elapsed_ms: start.elapsed().as_millis() as u64,
            started_at,
            resumed: walker.resumed(),
            session_log: self.session_log.then(|| state_dir.join(SESSION_LOG_FILE)),
        };
        info!("Finished {}: {}", pair, summary.summary());
        sink.finish(&summary);
        Ok(summary)
    }

    fn drive(
        &self,
        walker: &mut TreeWalker,
        comparator: &mut Comparator,
        backup_root: &Arc<Path>,
        sink: &mut dyn ReportSink,
        progress: &mut Progress,
        start: Instant,
    ) -> Result<()> {
        let progress_interval = Duration::from_millis(self.config.progress_interval_ms);
        let flush_interval = Duration::from_secs(self.config.flush_interval_secs);
        let mut last_progress = Instant::now();
        let mut last_flush = Instant::now();

        loop {
            self.shutdown.check()?;
            let Some(reference) = walker.next()? else {
                return Ok(());
            };
            if reference.relative_path().is_empty() {
                continue;
            }

            let mut backup = reference.counterpart(backup_root);
            debug!("Checking {}", reference.relative_path());
            match comparator.compare(reference, &mut backup)? {
                Outcome::Equivalent => sink.equivalent(reference.relative_path()),
                Outcome::Mismatch(mismatch) => {
                    progress.mismatches += 1;
                    debug!("{}", mismatch);
                    sink.mismatch(&mismatch)?;
                }
            }
            progress.items_checked += 1;
            progress.bytes_read = comparator.bytes_read();

            if last_progress.elapsed() >= progress_interval {
                progress.elapsed = start.elapsed();
                progress.current = Some(reference.relative_path().to_string());
                sink.progress(progress);
                last_progress = Instant::now();
            }

            if !flush_interval.is_zero() && last_flush.elapsed() >= flush_interval {
                walker.checkpoint();
                last_flush = Instant::now();
            }
        }
    }
}

/// Builder for [`BackupChecker`]
///
/// # Default Values
///
/// - `config_dir`: `~/.backup-chk`
/// - everything else: [`CheckConfig::default`]
/// - `resume`: true
/// - `session_log`: true
/// - `shutdown`: a fresh flag, not connected to any signal
#[derive(Debug)]
pub struct BackupCheckerBuilder {
    config_dir: Option<PathBuf>,
    config: CheckConfig,
    resume: bool,
    session_log: bool,
    shutdown: Option<ShutdownSignal>,
}

impl BackupCheckerBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config_dir: None,
            config: CheckConfig::default(),
            resume: true,
            session_log: true,
            shutdown: None,
        }
    }

    /// Set the configuration directory (state lives below it)
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Replace every tunable with `config`
    pub fn config(mut self, config: CheckConfig) -> Self {
        self.config = config;
        self
    }

    /// Set exclude patterns
    ///
    /// Patterns use `*` as a wildcard and are matched against paths relative
    /// to the reference root.
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.exclude = patterns;
        self
    }

    /// Set the directory enumeration batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the content comparison chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set how often progress is reported
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set how often the traversal log is checkpointed (zero disables)
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval_secs = interval.as_secs();
        self
    }

    /// Whether to resume from a left-over traversal log
    ///
    /// When disabled, saved state is discarded and every walk starts fresh.
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Whether to append mismatches to the per-root `log.txt`
    pub fn session_log(mut self, enabled: bool) -> Self {
        self.session_log = enabled;
        self
    }

    /// Observe `signal` between items and between chunks
    pub fn shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    /// Build the checker
    ///
    /// # Errors
    ///
    /// [`CheckError::InvalidConfiguration`](crate::CheckError::InvalidConfiguration)
    /// for a zero batch or chunk size.
    pub fn build(self) -> Result<BackupChecker> {
        self.config.validate()?;
        Ok(BackupChecker {
            config_dir: self.config_dir.unwrap_or_else(default_config_dir),
            config: self.config,
            resume: self.resume,
            session_log: self.session_log,
            shutdown: self.shutdown.unwrap_or_default(),
        })
    }
}

impl Default for BackupCheckerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
