//! Simple-glob exclude matching
//!
//! Patterns use `*` as "any characters, including none and including path
//! separators". A pattern is compiled into its literal fragments, and a
//! relative path matches when every fragment occurs in it, in order, each
//! search starting where the previous fragment ended. Leading and trailing
//! `*` are implied: `Library/Cache` excludes `Users/bob/Library/Cache/x.db`,
//! and `foo*bar` excludes `foo/x/bar`, `foobar` and `foo-bar`.
//!
//! Matching is substring based on purpose; it prunes huge trees with a few
//! `find` calls per path instead of a full glob engine.
//!
//! The matcher reorders itself: whenever a pattern matches it moves one slot
//! toward the front, so the patterns that fire most often (cache directories
//! with thousands of entries) end up being tried first. The order never
//! changes *what* is excluded.
//!
//! ```rust
//! use backup_chk::ExcludeMatcher;
//!
//! let mut matcher = ExcludeMatcher::build(["*.tmp", "Album Artwork/*/Cache"]);
//! assert!(matcher.matches("a/b/c.tmp"));
//! assert!(matcher.matches("Music/Album Artwork/Local/Cache/1.itc"));
//! assert!(!matcher.matches("a/b/c.txt"));
//! ```

/// Exclusions applied by `--macos-excludes`: caches, logs, trash and other
/// per-machine state that backup tools deliberately skip
pub const MACOS_EXCLUDES: &[&str] = &[
    ".Trash",
    "Library/Logs",
    "Library/Cache",
    "Library/Saved Application State",
    "Library/Application Support/*/Cache",
    "Library/Calendars/Calendar Cache",
    // iTunes
    "Album Artwork/Cache",
    "Album Artwork/Store",
    "Album Artwork/Generated",
    // Photos
    "CloudSync.noindex",
    ".photoslibrary/database",
    "Library/Containers/com.apple.cloudphotosd/*cloudphotoservicelibrary/database",
    // Xcode
    "Xcode/UserData/IB Support/Simulator Devices",
    "Xcode/DerivedData",
    "CoreSimulator/Devices",
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern {
    source: String,
    fragments: Vec<String>,
}

impl Pattern {
    fn compile(source: &str) -> Self {
        let fragments = source
            .trim_matches('*')
            .split('*')
            .filter(|fragment| !fragment.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            source: source.to_string(),
            fragments,
        }
    }

    fn matches(&self, path: &str) -> bool {
        let mut pos = 0;
        for fragment in &self.fragments {
            match path[pos..].find(fragment.as_str()) {
                Some(idx) => pos += idx + fragment.len(),
                None => return false,
            }
        }
        true
    }
}

/// Compiled exclude patterns that promote recent matches
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    patterns: Vec<Pattern>,
}

impl ExcludeMatcher {
    /// Compile `patterns`
    ///
    /// A pattern made only of `*` excludes everything. An empty list yields a
    /// matcher that excludes nothing.
    pub fn build<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| Pattern::compile(p.as_ref()))
                .collect(),
        }
    }

    /// Whether there are no patterns at all
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Number of compiled patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Source patterns in current lookup order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.source.as_str())
    }

    /// Test a relative path, promoting the matching pattern one slot
    pub fn matches(&mut self, relative_path: &str) -> bool {
        let hit = self
            .patterns
            .iter()
            .position(|pattern| pattern.matches(relative_path));
        match hit {
            Some(idx) => {
                if idx > 0 {
                    self.patterns.swap(idx - 1, idx);
                }
                true
            }
            None => false,
        }
    }
}
