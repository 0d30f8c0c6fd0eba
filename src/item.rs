//! Filesystem items with lazy, memoized metadata
//!
//! An [`FsItem`] is a handle to one entry (file, directory or symlink) below a
//! fixed root. Nothing touches the filesystem until it is asked for:
//!
//! - `stat()` runs `lstat` once and caches the result, failure included. An
//!   item is never re-stat'ed, even if the file changes afterwards.
//! - `relative_path()` strips the root prefix once and caches the string.
//! - `read_link()` caches the symlink target.
//! - `open()` / `list_children()` hold at most one OS handle, which is
//!   released by `close()`, by the scoped guards, or when the item drops.
//!
//! Items produced by enumerating a directory share the parent's root through
//! an `Arc<Path>`.

use crate::error::{CheckError, Result};
use crate::utils;
use std::cell::OnceCell;
use std::fmt;
use std::fs::{self, File, ReadDir};
use std::io::{self, Read};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// File type as seen by `lstat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link (never followed)
    Symlink,
    /// Device, fifo, socket...
    Other,
}

/// The subset of `lstat` results the comparator looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMeta {
    /// File type
    pub kind: ItemKind,
    /// Mode bits, file type included
    pub mode: u32,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl ItemMeta {
    fn from_metadata(metadata: &fs::Metadata) -> io::Result<Self> {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            ItemKind::Symlink
        } else if file_type.is_dir() {
            ItemKind::Directory
        } else if file_type.is_file() {
            ItemKind::File
        } else {
            ItemKind::Other
        };
        Ok(Self {
            kind,
            mode: utils::get_mode(metadata),
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }

    /// Whether this is a regular file
    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }

    /// Whether this is a directory
    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Directory
    }

    /// Whether this is a symbolic link
    pub fn is_symlink(&self) -> bool {
        self.kind == ItemKind::Symlink
    }
}

/// A stat failure, kept so it can be reported again without another syscall
#[derive(Debug, Clone)]
struct StatFailure {
    kind: io::ErrorKind,
    message: String,
}

impl StatFailure {
    fn to_error(&self, path: &Path) -> CheckError {
        CheckError::stat(path, io::Error::new(self.kind, self.message.clone()))
    }
}

impl From<io::Error> for StatFailure {
    fn from(err: io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

enum Handle {
    File(File),
    Dir(ReadDir),
}

/// Handle to one filesystem entry relative to a fixed root
pub struct FsItem {
    root: Arc<Path>,
    path: PathBuf,
    stat: OnceCell<std::result::Result<ItemMeta, StatFailure>>,
    relative: OnceCell<String>,
    link_target: OnceCell<PathBuf>,
    handle: Option<Handle>,
    skip_expansion: bool,
}

impl fmt::Debug for FsItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsItem")
            .field("root", &self.root)
            .field("path", &self.path)
            .field("stat", &self.stat.get())
            .field("open", &self.handle.is_some())
            .field("skip_expansion", &self.skip_expansion)
            .finish()
    }
}

impl FsItem {
    fn new(root: Arc<Path>, path: PathBuf) -> Self {
        Self {
            root,
            path,
            stat: OnceCell::new(),
            relative: OnceCell::new(),
            link_target: OnceCell::new(),
            handle: None,
            skip_expansion: false,
        }
    }

    /// Create the item for a tree root
    ///
    /// The root is stat'ed immediately and must be a directory (symlinks to
    /// directories are rejected, as everywhere else in the walk).
    ///
    /// # Errors
    ///
    /// - [`CheckError::Stat`] if the root cannot be stat'ed
    /// - [`CheckError::NotADirectory`] if it is not a directory
    pub fn root(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let root: Arc<Path> = Arc::from(path.as_path());
        let item = Self::new(root, path);
        if !item.stat()?.is_dir() {
            return Err(CheckError::NotADirectory { path: item.path });
        }
        Ok(item)
    }

    /// Synthesize an item from a relative path, with metadata deferred
    ///
    /// Used when pending work is reloaded from the traversal log.
    pub fn from_relative(root: Arc<Path>, relative: impl AsRef<Path>) -> Self {
        let path = root.join(relative);
        Self::new(root, path)
    }

    /// The same relative path below another root
    ///
    /// This is how reference items are mapped into the backup tree.
    pub fn counterpart(&self, other_root: &Arc<Path>) -> FsItem {
        let path = match self.path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => other_root.to_path_buf(),
            Ok(rel) => other_root.join(rel),
            Err(_) => other_root.join(self.relative_path()),
        };
        let item = Self::new(Arc::clone(other_root), path);
        let _ = item.relative.set(self.relative_path().to_string());
        item
    }

    /// Root this item is relative to
    pub fn root_path(&self) -> &Arc<Path> {
        &self.root
    }

    /// Absolute (root-joined) path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark this item as already expanded; the walker will yield it without
    /// enumerating its children again
    pub fn skip_expansion(mut self) -> Self {
        self.skip_expansion = true;
        self
    }

    /// Whether directory expansion is suppressed for this item
    pub fn expansion_suppressed(&self) -> bool {
        self.skip_expansion
    }

    /// `lstat` the item, at most once
    ///
    /// A failure is cached and returned again on every later call.
    pub fn stat(&self) -> Result<&ItemMeta> {
        let cached = self.stat.get_or_init(|| {
            fs::symlink_metadata(&self.path)
                .and_then(|metadata| ItemMeta::from_metadata(&metadata))
                .map_err(StatFailure::from)
        });
        cached.as_ref().map_err(|failure| failure.to_error(&self.path))
    }

    /// The cached stat error, if stat'ing this item failed
    pub fn stat_error(&self) -> Option<CheckError> {
        self.stat().err()
    }

    /// Whether the item is a directory
    ///
    /// Items that cannot be stat'ed are reported as non-directories; the
    /// error itself surfaces through [`FsItem::stat`].
    pub fn is_directory(&self) -> bool {
        self.stat().map(ItemMeta::is_dir).unwrap_or(false)
    }

    /// Path relative to the root, without a leading separator
    pub fn relative_path(&self) -> &str {
        self.relative.get_or_init(|| match self.path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => {
                let full = self.path.to_string_lossy();
                let root = self.root.to_string_lossy();
                let rel = full.strip_prefix(&*root).unwrap_or(&*full);
                rel.strip_prefix(std::path::MAIN_SEPARATOR).unwrap_or(rel).to_string()
            }
        })
    }

    /// Path relative to the root, byte for byte
    ///
    /// Unlike [`FsItem::relative_path`] this is not lossy, so it is what gets
    /// persisted for resume.
    pub fn relative_os_path(&self) -> &Path {
        self.path
            .strip_prefix(&self.root)
            .unwrap_or_else(|_| Path::new(self.relative_path()))
    }

    /// Target of a symbolic link, read once
    ///
    /// # Errors
    ///
    /// - [`CheckError::Stat`] if the item cannot be stat'ed
    /// - [`CheckError::NotASymlink`] if the item is not a symlink
    pub fn read_link(&self) -> Result<&Path> {
        if !self.stat()?.is_symlink() {
            return Err(CheckError::NotASymlink { path: self.path.clone() });
        }
        if let Some(target) = self.link_target.get() {
            return Ok(target.as_path());
        }
        let target = fs::read_link(&self.path).map_err(|e| CheckError::read(&self.path, e))?;
        Ok(self.link_target.get_or_init(|| target).as_path())
    }

    /// Open the item for reading
    ///
    /// Calling this again while the handle is open returns the same handle.
    pub fn open(&mut self) -> Result<&mut File> {
        if self.handle.is_none() {
            let file = File::open(&self.path).map_err(|e| CheckError::open(&self.path, e))?;
            self.handle = Some(Handle::File(file));
        }
        match self.handle.as_mut() {
            Some(Handle::File(file)) => Ok(file),
            _ => Err(CheckError::internal(format!(
                "{:?} is open for enumeration, not reading",
                self.path
            ))),
        }
    }

    /// Open the item and release the handle when the guard drops
    pub fn open_scoped(&mut self) -> Result<OpenItem<'_>> {
        self.open()?;
        Ok(OpenItem { item: self })
    }

    /// Enumerate children in batches of `batch_size`
    ///
    /// The returned iterator opens the directory on construction, yields
    /// non-empty batches, and closes the directory once a batch comes back
    /// empty. Dropping it early closes the directory too. The sequence is not
    /// restartable.
    ///
    /// # Errors
    ///
    /// - [`CheckError::NotADirectory`] if the item is not a directory
    /// - [`CheckError::ReadDir`] if the directory cannot be opened; read
    ///   errors surface as `Err` batches
    pub fn list_children(&mut self, batch_size: usize) -> Result<ChildBatches<'_>> {
        if !self.is_directory() {
            return Err(CheckError::NotADirectory { path: self.path.clone() });
        }
        if !matches!(self.handle, Some(Handle::Dir(_))) {
            let dir = fs::read_dir(&self.path).map_err(|source| CheckError::ReadDir {
                path: self.path.clone(),
                source,
            })?;
            self.handle = Some(Handle::Dir(dir));
        }
        Ok(ChildBatches {
            item: self,
            batch_size: batch_size.max(1),
        })
    }

    fn read_batch(&mut self, batch_size: usize) -> Result<Vec<FsItem>> {
        let Some(Handle::Dir(dir)) = self.handle.as_mut() else {
            return Ok(Vec::new());
        };
        let mut batch = Vec::new();
        while batch.len() < batch_size {
            match dir.next() {
                Some(Ok(entry)) => {
                    batch.push(FsItem::new(Arc::clone(&self.root), entry.path()));
                }
                Some(Err(source)) => {
                    return Err(CheckError::ReadDir {
                        path: self.path.clone(),
                        source,
                    })
                }
                None => break,
            }
        }
        Ok(batch)
    }

    /// Whether a file or directory handle is currently held
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Release the owned handle, if any; safe to call repeatedly
    pub fn close(&mut self) {
        self.handle = None;
    }
}

/// An opened item; the handle is closed when this guard drops
pub struct OpenItem<'a> {
    item: &'a mut FsItem,
}

impl OpenItem<'_> {
    /// Read until `buf` is full or end-of-file, returning the byte count
    ///
    /// A short count therefore always means end-of-file, never a short read
    /// from the OS.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let FsItem { handle, path, .. } = &mut *self.item;
        let Some(Handle::File(file)) = handle.as_mut() else {
            return Err(CheckError::internal(format!("{:?} is not open for reading", path)));
        };
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CheckError::read(path.as_path(), e)),
            }
        }
        Ok(filled)
    }
}

impl Deref for OpenItem<'_> {
    type Target = FsItem;

    fn deref(&self) -> &FsItem {
        &*self.item
    }
}

impl DerefMut for OpenItem<'_> {
    fn deref_mut(&mut self) -> &mut FsItem {
        &mut *self.item
    }
}

impl Drop for OpenItem<'_> {
    fn drop(&mut self) {
        self.item.close();
    }
}

/// Lazy batches of a directory's children, see [`FsItem::list_children`]
pub struct ChildBatches<'a> {
    item: &'a mut FsItem,
    batch_size: usize,
}

impl Iterator for ChildBatches<'_> {
    type Item = Result<Vec<FsItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.item.is_open() {
            return None;
        }
        match self.item.read_batch(self.batch_size) {
            Ok(batch) if batch.is_empty() => {
                self.item.close();
                None
            }
            Ok(batch) => Some(Ok(batch)),
            Err(e) => {
                self.item.close();
                Some(Err(e))
            }
        }
    }
}

impl Drop for ChildBatches<'_> {
    fn drop(&mut self) {
        self.item.close();
    }
}
