//! Property-based testing for backup-chk
//!
//! Uses proptest to verify invariants of exclude matching, root escaping and
//! the resumable walk across randomly generated inputs.

use ::backup_chk::utils::escape_root;
use ::backup_chk::*;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Relative paths built from a small alphabet so patterns actually hit
fn relative_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[abc/.-]{1,6}", 1..4).prop_map(|parts| parts.join("/"))
}

/// Patterns with literal fragments and `*` wildcards
fn pattern_strategy() -> impl Strategy<Value = String> {
    "[abc/*]{1,5}"
}

/// Path components, including the characters escaping has to encode
fn component_strategy() -> impl Strategy<Value = String> {
    "[ab%-]{1,4}"
}

fn root_from(components: &[String]) -> PathBuf {
    let mut root = PathBuf::from("/");
    for component in components {
        root.push(component);
    }
    root
}

/// Random tree description: directory paths and file paths below them
fn tree_strategy() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
    prop::collection::vec(prop::collection::vec("[a-d]{1,2}", 1..4), 1..12).prop_map(|paths| {
        let mut dirs = BTreeSet::new();
        let mut files = BTreeSet::new();
        for components in paths {
            let (file, parents) = components.split_last().unwrap();
            let mut prefix = String::new();
            for part in parents {
                prefix = if prefix.is_empty() {
                    format!("d_{}", part)
                } else {
                    format!("{}/d_{}", prefix, part)
                };
                dirs.insert(prefix.clone());
            }
            let file = if prefix.is_empty() {
                format!("f_{}", file)
            } else {
                format!("{}/f_{}", prefix, file)
            };
            files.insert(file);
        }
        (dirs.into_iter().collect(), files.into_iter().collect())
    })
}

fn build_tree(root: &Path, dirs: &[String], files: &[String]) {
    for dir in dirs {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
    for file in files {
        fs::write(root.join(file), file.as_bytes()).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_exclude_result_ignores_promotion_history(
        patterns in prop::collection::vec(pattern_strategy(), 0..6),
        history in prop::collection::vec(relative_path_strategy(), 0..20),
        candidate in relative_path_strategy(),
    ) {
        let mut warmed = ExcludeMatcher::build(&patterns);
        for path in &history {
            warmed.matches(path);
        }
        let mut fresh = ExcludeMatcher::build(&patterns);
        prop_assert_eq!(warmed.matches(&candidate), fresh.matches(&candidate));

        // Promotion only reorders
        let before: BTreeSet<String> = patterns.iter().cloned().collect();
        let after: BTreeSet<String> = warmed.patterns().map(str::to_string).collect();
        prop_assert_eq!(before, after);
        prop_assert_eq!(warmed.len(), patterns.len());
    }

    #[test]
    fn prop_exclude_result_ignores_pattern_order(
        patterns in prop::collection::vec(pattern_strategy(), 0..6),
        candidate in relative_path_strategy(),
    ) {
        let mut forward = ExcludeMatcher::build(&patterns);
        let mut backward = ExcludeMatcher::build(patterns.iter().rev());
        let expected = patterns
            .iter()
            .any(|pattern| ExcludeMatcher::build([pattern]).matches(&candidate));
        prop_assert_eq!(forward.matches(&candidate), expected);
        prop_assert_eq!(backward.matches(&candidate), expected);
    }

    #[test]
    fn prop_escape_root_is_injective(
        a in prop::collection::vec(component_strategy(), 0..4),
        b in prop::collection::vec(component_strategy(), 0..4),
    ) {
        let escaped_a = escape_root(&root_from(&a));
        let escaped_b = escape_root(&root_from(&b));
        prop_assert_eq!(escaped_a == escaped_b, a == b);
        prop_assert!(!escaped_a.contains('/'));
    }

    #[test]
    fn prop_resume_visits_every_entry(
        (dirs, files) in tree_strategy(),
        stop_after in 1usize..30,
        batch_size in 1usize..4,
    ) {
        let tree = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        build_tree(tree.path(), &dirs, &files);
        let expected: BTreeSet<String> = dirs.iter().chain(files.iter()).cloned().collect();

        let mut visited = BTreeSet::new();
        {
            let root = FsItem::root(tree.path()).unwrap();
            let mut walker = TreeWalker::open(root, state.path(), ExcludeMatcher::default())
                .unwrap()
                .with_batch_size(batch_size);
            for _ in 0..stop_after {
                match walker.next().unwrap() {
                    Some(item) => {
                        visited.insert(item.relative_path().to_string());
                    }
                    None => break,
                }
            }
        }
        {
            let root = FsItem::root(tree.path()).unwrap();
            let mut walker = TreeWalker::open(root, state.path(), ExcludeMatcher::default())
                .unwrap()
                .with_batch_size(batch_size);
            while let Some(item) = walker.next().unwrap() {
                visited.insert(item.relative_path().to_string());
            }
            prop_assert_eq!(walker.pending(), 0);
        }

        visited.remove("");
        info!("Visited {} of {} entries", visited.len(), expected.len());
        prop_assert_eq!(visited, expected);
    }
}
