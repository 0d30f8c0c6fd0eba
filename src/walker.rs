//! Depth-first, crash-resumable tree walker
//!
//! [`TreeWalker`] walks a reference tree with an explicit LIFO stack of
//! [`FsItem`]s. Directories are yielded themselves and their children are
//! pushed, so the walk is depth-first; sibling order is whatever directory
//! enumeration returns.
//!
//! ## Resume
//!
//! The pending stack is persisted to a [`TraversalLog`] whenever the walker
//! checkpoints or closes. A yielded item is only expanded on the *following*
//! call to [`TreeWalker::next`], and until then it stays "in flight" and is
//! persisted on top of the stack. Every persisted entry is therefore
//! unexpanded: a resumed walk re-verifies at most the one item that was being
//! compared when the process stopped, and never loses a pending subtree.
//!
//! On resume the log entries are rebuilt against the current root (metadata
//! deferred) and the fresh root item goes on top, marked as already
//! expanded, so it is re-checked but its children are not pushed again.
//! The marker sits on the root rather than on the entries: no persisted
//! entry was ever expanded, so each must expand normally, while the root's
//! children were pushed by the earlier run and are already in the log.
//!
//! Entries are persisted as exact relative path bytes (see [`TraversalLog`]
//! for the escaping), so names with surrounding spaces, newlines or bytes
//! that are not UTF-8 resume to the same file.
//!
//! ## States
//!
//! ```text
//! Fresh / Resumed --next()--> Running --next() == None--> Drained --close()--> Closed
//!                                   \--error / interrupt------------------/
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use backup_chk::{ExcludeMatcher, FsItem, TreeWalker};
//! use std::path::Path;
//!
//! # fn main() -> backup_chk::Result<()> {
//! let root = FsItem::root("/Users/bob")?;
//! let mut walker = TreeWalker::open(
//!     root,
//!     Path::new("/tmp/state"),
//!     ExcludeMatcher::build(["Library/Cache"]),
//! )?;
//! while let Some(item) = walker.next()? {
//!     println!("{}", item.relative_path());
//! }
//! walker.close();
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::exclude::ExcludeMatcher;
use crate::item::FsItem;
use crate::traversal_log::TraversalLog;
use crate::types::DEFAULT_BATCH_SIZE;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Stack-based walker over one reference root
#[derive(Debug)]
pub struct TreeWalker {
    root: Arc<Path>,
    stack: Vec<FsItem>,
    in_flight: Option<FsItem>,
    exclude: Option<ExcludeMatcher>,
    log: Arc<TraversalLog>,
    batch_size: usize,
    resumed: bool,
}

impl TreeWalker {
    /// Open a walker over `root`, resuming from the log in `state_dir`
    ///
    /// Log entries that match `exclude` are dropped. An empty matcher is
    /// never consulted.
    pub fn open(root: FsItem, state_dir: &Path, exclude: ExcludeMatcher) -> Result<Self> {
        let (log, entries) = TraversalLog::open(state_dir)?;
        let mut exclude = (!exclude.is_empty()).then_some(exclude);
        let root_path = Arc::clone(root.root_path());

        let resumed = !entries.is_empty();
        let mut stack = Vec::with_capacity(entries.len() + 1);
        if resumed {
            for entry in entries {
                let item = FsItem::from_relative(Arc::clone(&root_path), entry);
                if is_excluded(&mut exclude, item.relative_path()) {
                    debug!("Dropping excluded pending entry {}", item.relative_path());
                    continue;
                }
                stack.push(item);
            }
            stack.push(root.skip_expansion());
        } else {
            stack.push(root);
        }

        Ok(Self {
            root: root_path,
            stack,
            in_flight: None,
            exclude,
            log: Arc::new(log),
            batch_size: DEFAULT_BATCH_SIZE,
            resumed,
        })
    }

    /// Set the directory enumeration batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Root being walked
    pub fn root(&self) -> &Arc<Path> {
        &self.root
    }

    /// Whether pending work was loaded from a previous run
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Items still to be yielded, plus the one in flight
    pub fn pending(&self) -> usize {
        self.stack.len() + usize::from(self.in_flight.is_some())
    }

    /// Location of the traversal log
    pub fn log_path(&self) -> PathBuf {
        self.log.path().to_path_buf()
    }

    /// Shared handle to the traversal log
    pub fn log(&self) -> Arc<TraversalLog> {
        Arc::clone(&self.log)
    }

    /// Yield the next item, or `None` once the walk is drained
    ///
    /// Expands the previously yielded item first if it is a directory. An
    /// item that cannot be stat'ed aborts the walk with its stat error and
    /// stays pending, so a resumed run stops on it again.
    pub fn next(&mut self) -> Result<Option<&mut FsItem>> {
        if let Some(mut previous) = self.in_flight.take() {
            if previous.is_directory() && !previous.expansion_suppressed() {
                if let Err(e) = self.expand(&mut previous) {
                    self.in_flight = Some(previous);
                    return Err(e);
                }
            }
        }

        let Some(item) = self.stack.pop() else {
            return Ok(None);
        };

        if let Some(err) = item.stat_error() {
            self.stack.push(item);
            return Err(err);
        }

        trace!("Yielding {}", item.relative_path());
        Ok(Some(self.in_flight.insert(item)))
    }

    /// Push the non-excluded children of `dir`
    ///
    /// Children are collected before anything is pushed, so a failed
    /// enumeration leaves the stack untouched and `dir` can be retried.
    fn expand(&mut self, dir: &mut FsItem) -> Result<()> {
        let mut children = Vec::new();
        for batch in dir.list_children(self.batch_size)? {
            for child in batch? {
                if is_excluded(&mut self.exclude, child.relative_path()) {
                    debug!("Excluding {}", child.relative_path());
                    continue;
                }
                children.push(child);
            }
        }
        self.stack.extend(children);
        Ok(())
    }

    /// Relative paths to persist, bottom of the stack first
    fn pending_entries(&self) -> Vec<&Path> {
        let in_flight = self
            .in_flight
            .as_ref()
            .filter(|item| !item.expansion_suppressed());
        self.stack
            .iter()
            .chain(in_flight)
            .map(FsItem::relative_os_path)
            .filter(|path| !path.as_os_str().is_empty())
            .collect()
    }

    /// Persist the pending stack without closing the log
    ///
    /// Failures are logged; the walk goes on, but a crash before the next
    /// successful checkpoint resumes from older state.
    pub fn checkpoint(&self) {
        if let Err(e) = self.log.rewrite(self.pending_entries()) {
            warn!("{} (resume state may be stale)", e);
        }
    }

    /// Persist the pending stack and close the log; later calls do nothing
    pub fn close(&mut self) {
        let entries = self.pending_entries();
        let pending = entries.len();
        match self.log.close(entries) {
            Ok(true) if pending > 0 => {
                debug!("Saved {} pending entries to {:?}", pending, self.log.path())
            }
            Ok(_) => {}
            Err(e) => warn!("{} (it should be removed before the next run)", e),
        }
    }
}

impl Drop for TreeWalker {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_excluded(exclude: &mut Option<ExcludeMatcher>, relative_path: &str) -> bool {
    exclude
        .as_mut()
        .is_some_and(|matcher| matcher.matches(relative_path))
}
