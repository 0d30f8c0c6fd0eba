//! Reference/backup item comparison
//!
//! [`Comparator::compare`] decides whether a backup item faithfully mirrors
//! its reference item. Checks run cheapest first and stop at the first
//! verdict:
//!
//! 1. reference modified after backup: equivalent (the backup will catch up)
//! 2. directory on one side only: mismatch
//! 3. both directories: equivalent (children are visited on their own)
//! 4. mode bits differ: mismatch
//! 5. symlink on one side only: mismatch
//! 6. both symlinks: equal targets are equivalent, links are never followed
//! 7. sizes differ: mismatch
//! 8. not a regular file (fifo, socket, device): equivalent, with a warning,
//!    since opening one can block forever or fail outright
//! 9. contents compared chunk by chunk, in lockstep
//!
//! Stat, open and read failures are errors, never a pass.

use crate::error::Result;
use crate::item::{FsItem, ItemMeta};
use crate::shutdown::ShutdownSignal;
use crate::types::{Mismatch, MismatchKind, Outcome, DEFAULT_CHUNK_SIZE};
use tracing::{trace, warn};

/// Compares reference items against their backup counterparts
///
/// Owns its chunk buffers and the running count of bytes read, so every walk
/// (one comparator each) keeps its own throughput figures.
#[derive(Debug)]
pub struct Comparator {
    chunk_size: usize,
    reference_buf: Vec<u8>,
    backup_buf: Vec<u8>,
    bytes_read: u64,
    shutdown: Option<ShutdownSignal>,
}

impl Default for Comparator {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl Comparator {
    /// Create a comparator reading `chunk_size` bytes per side at a time
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            reference_buf: vec![0; chunk_size],
            backup_buf: vec![0; chunk_size],
            bytes_read: 0,
            shutdown: None,
        }
    }

    /// Abort content comparison with `Interrupted` once `signal` triggers
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes read from both sides so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Compare `reference` with `backup`
    ///
    /// Both items are closed again on every path out of this call.
    ///
    /// # Errors
    ///
    /// - [`CheckError::Stat`](crate::CheckError::Stat) if either side cannot be stat'ed
    /// - [`CheckError::Open`](crate::CheckError::Open) / [`CheckError::Read`](crate::CheckError::Read)
    ///   during content comparison
    /// - [`CheckError::Interrupted`](crate::CheckError::Interrupted) if the
    ///   shutdown signal fires between chunks
    pub fn compare(&mut self, reference: &mut FsItem, backup: &mut FsItem) -> Result<Outcome> {
        let ref_meta = reference.stat()?.clone();
        let backup_meta = backup.stat()?.clone();
        let path = reference.relative_path().to_string();

        if ref_meta.modified > backup_meta.modified {
            trace!("{}: reference is newer than backup, skipping", path);
            return Ok(Outcome::Equivalent);
        }

        if ref_meta.is_dir() != backup_meta.is_dir() {
            return Ok(mismatch(
                path,
                MismatchKind::IsDirectory,
                ref_meta.is_dir(),
                backup_meta.is_dir(),
            ));
        }
        if ref_meta.is_dir() {
            return Ok(Outcome::Equivalent);
        }

        if ref_meta.mode != backup_meta.mode {
            return Ok(mismatch(
                path,
                MismatchKind::Mode,
                format_mode(&ref_meta),
                format_mode(&backup_meta),
            ));
        }

        if ref_meta.is_symlink() != backup_meta.is_symlink() {
            return Ok(mismatch(
                path,
                MismatchKind::Symlink,
                ref_meta.is_symlink(),
                backup_meta.is_symlink(),
            ));
        }
        if ref_meta.is_symlink() {
            let ref_target = reference.read_link()?;
            let backup_target = backup.read_link()?;
            if ref_target != backup_target {
                return Ok(mismatch(
                    path,
                    MismatchKind::SymlinkTarget,
                    ref_target.display(),
                    backup_target.display(),
                ));
            }
            return Ok(Outcome::Equivalent);
        }

        if ref_meta.size != backup_meta.size {
            return Ok(mismatch(path, MismatchKind::Size, ref_meta.size, backup_meta.size));
        }

        if !ref_meta.is_file() {
            warn!(
                "{}: not comparing contents of special file (exclude it to silence this)",
                path
            );
            return Ok(Outcome::Equivalent);
        }

        self.compare_contents(path, reference, backup)
    }

    fn compare_contents(
        &mut self,
        path: String,
        reference: &mut FsItem,
        backup: &mut FsItem,
    ) -> Result<Outcome> {
        let mut reference = reference.open_scoped()?;
        let mut backup = backup.open_scoped()?;

        let mut offset = 0u64;
        loop {
            if let Some(signal) = &self.shutdown {
                signal.check()?;
            }

            let ref_len = reference.read_chunk(&mut self.reference_buf)?;
            let backup_len = backup.read_chunk(&mut self.backup_buf)?;
            self.bytes_read += (ref_len + backup_len) as u64;

            if ref_len != backup_len
                || self.reference_buf[..ref_len] != self.backup_buf[..backup_len]
            {
                return Ok(mismatch(
                    path,
                    MismatchKind::Chunk { offset },
                    format!("(chunk of size {})", ref_len),
                    format!("(chunk of size {})", backup_len),
                ));
            }

            // read_chunk only comes back short at end-of-file
            if ref_len < self.chunk_size {
                return Ok(Outcome::Equivalent);
            }
            offset += ref_len as u64;
        }
    }
}

fn mismatch(
    path: String,
    kind: MismatchKind,
    reference: impl ToString,
    backup: impl ToString,
) -> Outcome {
    Outcome::Mismatch(Mismatch {
        path,
        kind,
        reference: reference.to_string(),
        backup: backup.to_string(),
    })
}

fn format_mode(meta: &ItemMeta) -> String {
    format!("{:o}", meta.mode)
}
