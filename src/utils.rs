//! Utility functions for backup-chk
//!
//! Small helpers shared by the library and the CLI:
//!
//! - Mode bits from metadata (cross-platform)
//! - Lexical path normalization and the per-root state directory name
//! - `~` expansion for the configuration directory
//! - Human-readable byte and count formatting

use crate::error::Result;
use std::borrow::Cow;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Get Unix mode bits (file type and permissions) from metadata
#[cfg(unix)]
pub fn get_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

/// Get mode bits from metadata (Windows implementation)
///
/// Synthesizes a Unix-like mode: type bits from the file type and a
/// read-only flag mapped onto the owner write bit.
#[cfg(not(unix))]
pub fn get_mode(metadata: &fs::Metadata) -> u32 {
    let file_type = metadata.file_type();
    let type_bits = if file_type.is_symlink() {
        0o120000
    } else if file_type.is_dir() {
        0o040000
    } else {
        0o100000
    };
    let perm_bits = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
    type_bits | perm_bits
}

/// Make `path` absolute and remove `.` and `..` components lexically
///
/// Symlinks are not resolved, so a root given through a symlinked path keeps
/// its own state directory.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Encode a normalized absolute root as a single directory name
///
/// Separators become `-`; a literal `-` becomes `%2D` and a literal `%`
/// becomes `%25`, so decoding is unambiguous and two distinct roots never
/// share a name. The filesystem root itself maps to `-`.
pub fn escape_root(normalized: &Path) -> String {
    let mut parts = Vec::new();
    for component in normalized.components() {
        match component {
            Component::RootDir => {}
            Component::Prefix(prefix) => {
                parts.push(escape_component(&prefix.as_os_str().to_string_lossy().replace(':', "")))
            }
            other => parts.push(escape_component(&other.as_os_str().to_string_lossy())),
        }
    }
    if parts.is_empty() {
        return "-".to_string();
    }
    parts.join("-")
}

fn escape_component(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for ch in component.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '-' => out.push_str("%2D"),
            other => out.push(other),
        }
    }
    out
}

/// Raw bytes of a path
#[cfg(unix)]
pub fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

/// Bytes of a path (Windows implementation, lossy for unpaired surrogates)
#[cfg(not(unix))]
pub fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    match path.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

/// Inverse of [`path_bytes`]
#[cfg(unix)]
pub fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

/// Inverse of [`path_bytes`] (Windows implementation)
#[cfg(not(unix))]
pub fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

/// Expand a leading `~/` to the current user's home directory
pub fn expand_user(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Format bytes in human-readable form
///
/// Uses binary units (1024-based). Values below 1 KB are printed as whole
/// numbers, larger values with two decimals.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Format a count with thousands separators (`1234567` -> `1,234,567`)
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
