//! Report sinks
//!
//! The checker never formats output itself. Everything it learns (per-item
//! verdicts, periodic progress, the final summary) is handed to a
//! [`ReportSink`]. Two sinks ship with the library:
//!
//! - [`CollectingSink`] keeps everything in memory, for embedders and tests
//! - [`SessionLogSink`] appends mismatches to the per-root `log.txt` with a
//!   timestamp and forwards every call to an inner sink

use crate::error::Result;
use crate::types::{CheckSummary, Mismatch, Progress, RootPair};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Session log file name inside the state directory
pub const SESSION_LOG_FILE: &str = "log.txt";

/// Receiver of check results
///
/// Only [`ReportSink::mismatch`] must be implemented.
///
/// # Examples
///
/// ```rust
/// use backup_chk::{Mismatch, ReportSink, Result};
///
/// struct CountingSink(usize);
///
/// impl ReportSink for CountingSink {
///     fn mismatch(&mut self, _mismatch: &Mismatch) -> Result<()> {
///         self.0 += 1;
///         Ok(())
///     }
/// }
/// ```
pub trait ReportSink {
    /// Called once before a pair is walked
    ///
    /// `state_dir` is the per-root directory holding the traversal log.
    /// Returning an error cancels the check of this pair.
    fn begin(&mut self, pair: &RootPair, state_dir: &Path) -> Result<()> {
        let _ = (pair, state_dir);
        Ok(())
    }

    /// An item matched its backup
    fn equivalent(&mut self, relative_path: &str) {
        let _ = relative_path;
    }

    /// An item diverged from its backup
    ///
    /// Returning an error aborts the walk like any other fatal error.
    fn mismatch(&mut self, mismatch: &Mismatch) -> Result<()>;

    /// Periodic aggregate counters
    fn progress(&mut self, progress: &Progress) {
        let _ = progress;
    }

    /// Called once after a pair was walked to completion
    fn finish(&mut self, summary: &CheckSummary) {
        let _ = summary;
    }
}

impl<S: ReportSink + ?Sized> ReportSink for &mut S {
    fn begin(&mut self, pair: &RootPair, state_dir: &Path) -> Result<()> {
        (**self).begin(pair, state_dir)
    }

    fn equivalent(&mut self, relative_path: &str) {
        (**self).equivalent(relative_path)
    }

    fn mismatch(&mut self, mismatch: &Mismatch) -> Result<()> {
        (**self).mismatch(mismatch)
    }

    fn progress(&mut self, progress: &Progress) {
        (**self).progress(progress)
    }

    fn finish(&mut self, summary: &CheckSummary) {
        (**self).finish(summary)
    }
}

impl<S: ReportSink + ?Sized> ReportSink for Box<S> {
    fn begin(&mut self, pair: &RootPair, state_dir: &Path) -> Result<()> {
        (**self).begin(pair, state_dir)
    }

    fn equivalent(&mut self, relative_path: &str) {
        (**self).equivalent(relative_path)
    }

    fn mismatch(&mut self, mismatch: &Mismatch) -> Result<()> {
        (**self).mismatch(mismatch)
    }

    fn progress(&mut self, progress: &Progress) {
        (**self).progress(progress)
    }

    fn finish(&mut self, summary: &CheckSummary) {
        (**self).finish(summary)
    }
}

/// Sink that records everything it receives
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    /// Pairs passed to `begin`, in order
    pub pairs: Vec<RootPair>,
    /// Relative paths reported equivalent
    pub equivalent: Vec<String>,
    /// Reported mismatches
    pub mismatches: Vec<Mismatch>,
    /// Progress snapshots
    pub progress: Vec<Progress>,
    /// Final summaries
    pub summaries: Vec<CheckSummary>,
}

impl CollectingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Every relative path reported, equivalent or not
    pub fn checked(&self) -> impl Iterator<Item = &str> {
        self.equivalent
            .iter()
            .map(String::as_str)
            .chain(self.mismatches.iter().map(|m| m.path.as_str()))
    }
}

impl ReportSink for CollectingSink {
    fn begin(&mut self, pair: &RootPair, _state_dir: &Path) -> Result<()> {
        self.pairs.push(pair.clone());
        Ok(())
    }

    fn equivalent(&mut self, relative_path: &str) {
        self.equivalent.push(relative_path.to_string());
    }

    fn mismatch(&mut self, mismatch: &Mismatch) -> Result<()> {
        self.mismatches.push(mismatch.clone());
        Ok(())
    }

    fn progress(&mut self, progress: &Progress) {
        self.progress.push(progress.clone());
    }

    fn finish(&mut self, summary: &CheckSummary) {
        self.summaries.push(summary.clone());
    }
}

/// Sink that appends mismatches to the session log of each root
///
/// The log is opened in append mode by `begin`, so the mismatches of every
/// run (resumed or not) accumulate in one file per reference root.
#[derive(Debug)]
pub struct SessionLogSink<S> {
    inner: S,
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl<S: ReportSink> SessionLogSink<S> {
    /// Wrap `inner`
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            path: None,
            writer: None,
        }
    }

    /// The log opened by the last `begin`, if any
    pub fn session_log(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The wrapped sink
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap the inner sink
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{} {}", Utc::now().to_rfc3339(), line)?;
            writer.flush()?;
        }
        Ok(())
    }
}

impl<S: ReportSink> ReportSink for SessionLogSink<S> {
    fn begin(&mut self, pair: &RootPair, state_dir: &Path) -> Result<()> {
        let path = state_dir.join(SESSION_LOG_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.writer = Some(BufWriter::new(file));
        self.path = Some(path);
        self.write_line(&format!("checking {}", pair))?;
        self.inner.begin(pair, state_dir)
    }

    fn equivalent(&mut self, relative_path: &str) {
        self.inner.equivalent(relative_path)
    }

    fn mismatch(&mut self, mismatch: &Mismatch) -> Result<()> {
        self.write_line(&mismatch.to_string())?;
        self.inner.mismatch(mismatch)
    }

    fn progress(&mut self, progress: &Progress) {
        self.inner.progress(progress)
    }

    fn finish(&mut self, summary: &CheckSummary) {
        if let Err(e) = self.write_line(&summary.summary()) {
            warn!("Failed to write session log: {}", e);
        }
        self.writer = None;
        self.inner.finish(summary)
    }
}
