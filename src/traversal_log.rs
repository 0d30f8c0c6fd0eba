//! Persisted record of a walk's pending work
//!
//! The traversal log is a UTF-8 text file holding one relative path per
//! line: the walker's pending stack, bottom first. It lives next to the
//! session log in the per-root state directory and is rewritten whole
//! (truncate, then write) rather than appended to, so its size is bounded by
//! outstanding work no matter how many times a walk is resumed.
//!
//! Entries are escaped so any relative path survives the round trip: `%`,
//! ASCII control characters (newlines included), bytes that are not UTF-8
//! and spaces at either end of the line are written as `%XX`. Lines are
//! trimmed and blank lines skipped on read, which never loses data because
//! the writer never produces surrounding whitespace. A `%` not followed by
//! two hex digits is kept literally.
//!
//! An empty log means "start fresh". A drained walk leaves an empty file
//! behind.
//!
//! All writes go through one lock. The first `close` flushes and releases
//! the file, later ones are no-ops, so an interrupt path and the normal
//! completion path can both call it.

use crate::error::{CheckError, Result};
use crate::utils;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Handle to the `walk-stack` file of one reference root
#[derive(Debug)]
pub struct TraversalLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl TraversalLog {
    /// File name inside the state directory
    pub const FILE_NAME: &'static str = "walk-stack";

    /// Open (creating if needed) the log in `state_dir` and read back its entries
    ///
    /// Entries are returned decoded, in file order; blank lines are skipped.
    pub fn open(state_dir: &Path) -> Result<(Self, Vec<PathBuf>)> {
        let path = state_dir.join(Self::FILE_NAME);
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        let entries: Vec<PathBuf> = raw
            .split(|&b| b == b'\n')
            .map(|line| line.trim_ascii())
            .filter(|line| !line.is_empty())
            .map(decode_entry)
            .collect();

        if !entries.is_empty() {
            info!(
                "Loading previous run state from {:?} ({} pending entries)",
                path,
                entries.len()
            );
        }

        Ok((
            Self {
                path,
                file: Mutex::new(Some(file)),
            },
            entries,
        ))
    }

    /// Delete any saved state in `state_dir`
    pub fn discard(state_dir: &Path) -> Result<()> {
        match fs::remove_file(state_dir.join(Self::FILE_NAME)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the log has been closed
    pub fn is_closed(&self) -> bool {
        self.file.lock().is_none()
    }

    /// Replace the log contents with `entries`, keeping the file open
    ///
    /// Does nothing once the log is closed.
    pub fn rewrite<I, P>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut guard = self.file.lock();
        match guard.as_mut() {
            Some(file) => self.write_entries(file, entries),
            None => Ok(()),
        }
    }

    /// Rewrite the log with `entries` and release the file
    ///
    /// Returns `Ok(false)` if the log was already closed. The file is released
    /// even when the rewrite fails.
    pub fn close<I, P>(&self, entries: I) -> Result<bool>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut guard = self.file.lock();
        let Some(mut file) = guard.take() else {
            return Ok(false);
        };
        self.write_entries(&mut file, entries)?;
        Ok(true)
    }

    fn write_entries<I, P>(&self, file: &mut File, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let flush_error = |source| CheckError::LogFlush {
            path: self.path.clone(),
            source,
        };

        file.set_len(0).map_err(flush_error)?;
        file.seek(SeekFrom::Start(0)).map_err(flush_error)?;

        let mut writer = BufWriter::new(&mut *file);
        let mut count = 0usize;
        for entry in entries {
            writer
                .write_all(encode_entry(entry.as_ref()).as_bytes())
                .map_err(flush_error)?;
            writer.write_all(b"\n").map_err(flush_error)?;
            count += 1;
        }
        writer.flush().map_err(flush_error)?;
        drop(writer);
        file.sync_data().map_err(flush_error)?;

        if count > 0 {
            debug!("Flushed {} pending entries to {:?}", count, self.path);
        }
        Ok(())
    }
}

/// Escape a relative path into one log line
fn encode_entry(relative: &Path) -> String {
    let bytes = utils::path_bytes(relative);
    let mut out = String::with_capacity(bytes.len());
    let mut rest: &[u8] = &bytes;
    while !rest.is_empty() {
        let (valid, invalid) = match std::str::from_utf8(rest) {
            Ok(valid) => (valid, &[][..]),
            Err(e) => {
                let (head, tail) = rest.split_at(e.valid_up_to());
                let bad = e.error_len().unwrap_or(tail.len());
                (std::str::from_utf8(head).unwrap_or_default(), &tail[..bad])
            }
        };
        for ch in valid.chars() {
            match ch {
                '%' => out.push_str("%25"),
                c if c.is_ascii_control() => escape_byte(&mut out, c as u8),
                c => out.push(c),
            }
        }
        for &byte in invalid {
            escape_byte(&mut out, byte);
        }
        rest = &rest[valid.len() + invalid.len()..];
    }

    let leading = out.len() - out.trim_start_matches(' ').len();
    let trailing = out.len() - out.trim_end_matches(' ').len();
    if leading == 0 && trailing == 0 {
        return out;
    }
    if leading == out.len() {
        return "%20".repeat(leading);
    }
    let body = &out[leading..out.len() - trailing];
    format!("{}{}{}", "%20".repeat(leading), body, "%20".repeat(trailing))
}

fn escape_byte(out: &mut String, byte: u8) {
    use std::fmt::Write as _;
    let _ = write!(out, "%{:02X}", byte);
}

/// Inverse of [`encode_entry`]
fn decode_entry(line: &[u8]) -> PathBuf {
    let mut bytes = Vec::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        if line[i] == b'%' && i + 2 < line.len() {
            if let (Some(hi), Some(lo)) = (hex_value(line[i + 1]), hex_value(line[i + 2])) {
                bytes.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        bytes.push(line[i]);
        i += 1;
    }
    utils::path_from_bytes(bytes)
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}
