//! Main test module for backup-chk
//!
//! This module includes all test suites:
//! - Integration tests for whole checks over generated trees
//! - Chaos tests for interruption, crashes and corrupted state
//! - Property-based tests for invariants
//! - Edge cases for unusual names and shapes

pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::backup_chk::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn checker(config: &TempDir) -> BackupChecker {
        BackupChecker::builder()
            .config_dir(config.path())
            .build()
            .unwrap()
    }

    fn write_both(reference: &Path, backup: &Path, rel: &str, content: &[u8]) {
        for root in [reference, backup] {
            let path = root.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, content).unwrap();
        }
        set_file_mtime(reference.join(rel), FileTime::from_unix_time(1_000_000, 0)).unwrap();
    }

    #[test]
    fn test_empty_directory() {
        let reference = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let config = TempDir::new().unwrap();

        let summary = checker(&config)
            .check_pair(
                &RootPair::new(reference.path(), backup.path()),
                &mut CollectingSink::new(),
            )
            .unwrap();
        assert_eq!(summary.items_checked, 0);
        assert!(summary.is_clean());
    }

    #[test]
    fn test_special_filenames() {
        let reference = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let config = TempDir::new().unwrap();

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "100%-done.txt",
            ".hidden",
            "ファイル.txt",
            "文件.txt",
            "émoji_😀.txt",
        ];
        for name in &special_names {
            write_both(reference.path(), backup.path(), name, name.as_bytes());
        }

        let mut sink = CollectingSink::new();
        let summary = checker(&config)
            .check_pair(&RootPair::new(reference.path(), backup.path()), &mut sink)
            .unwrap();
        assert_eq!(summary.items_checked as usize, special_names.len());
        assert!(summary.is_clean());
        for name in &special_names {
            assert!(sink.checked().any(|rel| rel == *name), "{} not checked", name);
        }
    }

    #[test]
    fn test_special_root_names_get_distinct_state() {
        let parent = TempDir::new().unwrap();
        let config = TempDir::new().unwrap();
        let checker = checker(&config);

        let roots = ["a-b", "a/b", "a%2Db", "a%b"];
        let mut state_dirs = Vec::new();
        for root in roots {
            fs::create_dir_all(parent.path().join(root)).unwrap();
            state_dirs.push(checker.state_dir(&parent.path().join(root)).unwrap());
        }
        for (i, a) in state_dirs.iter().enumerate() {
            for b in &state_dirs[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_equivalent_root_spellings_share_state() {
        let reference = TempDir::new().unwrap();
        let config = TempDir::new().unwrap();
        fs::create_dir(reference.path().join("sub")).unwrap();
        let checker = checker(&config);

        let plain = checker.state_dir(reference.path()).unwrap();
        let dotted = checker
            .state_dir(&reference.path().join("sub").join("..").join("."))
            .unwrap();
        assert_eq!(plain, dotted);
    }

    #[test]
    fn test_exclude_everything() {
        let reference = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let config = TempDir::new().unwrap();
        write_both(reference.path(), backup.path(), "a/b/c.txt", b"abc");
        // The backup side is missing entirely, but nothing is looked at
        fs::remove_dir_all(backup.path().join("a")).unwrap();

        let summary = BackupChecker::builder()
            .config_dir(config.path())
            .exclude_patterns(vec!["*".to_string()])
            .build()
            .unwrap()
            .check_pair(
                &RootPair::new(reference.path(), backup.path()),
                &mut CollectingSink::new(),
            )
            .unwrap();
        assert_eq!(summary.items_checked, 0);
    }

    #[test]
    fn test_deep_nesting() {
        let reference = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let config = TempDir::new().unwrap();

        let deep: Vec<String> = (0..40).map(|i| format!("level{}", i)).collect();
        let rel = format!("{}/leaf.txt", deep.join("/"));
        write_both(reference.path(), backup.path(), &rel, b"bottom");

        let summary = checker(&config)
            .check_pair(
                &RootPair::new(reference.path(), backup.path()),
                &mut CollectingSink::new(),
            )
            .unwrap();
        assert_eq!(summary.items_checked, 41);
        assert_eq!(summary.bytes_read, 12);
    }

    #[test]
    fn test_extra_backup_files_are_ignored() {
        let reference = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let config = TempDir::new().unwrap();
        write_both(reference.path(), backup.path(), "kept.txt", b"kept");
        fs::write(backup.path().join("only-in-backup.txt"), "extra").unwrap();

        let summary = checker(&config)
            .check_pair(
                &RootPair::new(reference.path(), backup.path()),
                &mut CollectingSink::new(),
            )
            .unwrap();
        assert_eq!(summary.items_checked, 1);
        assert!(summary.is_clean());
    }

    #[test]
    fn test_backup_root_is_a_file() {
        let reference = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let config = TempDir::new().unwrap();
        let file = backup.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();

        let err = checker(&config)
            .check_pair(&RootPair::new(reference.path(), &file), &mut CollectingSink::new())
            .unwrap_err();
        assert!(matches!(err, CheckError::NotADirectory { .. }));
        assert!(err.is_startup_error());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks() {
        use filetime::set_symlink_file_times;
        use std::os::unix::fs::symlink;

        let reference = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let config = TempDir::new().unwrap();
        let old = FileTime::from_unix_time(1_000_000, 0);

        symlink("target.txt", reference.path().join("same")).unwrap();
        symlink("target.txt", backup.path().join("same")).unwrap();
        symlink("one.txt", reference.path().join("moved")).unwrap();
        symlink("two.txt", backup.path().join("moved")).unwrap();
        for link in ["same", "moved"] {
            set_symlink_file_times(reference.path().join(link), old, old).unwrap();
        }

        let mut sink = CollectingSink::new();
        let summary = checker(&config)
            .check_pair(&RootPair::new(reference.path(), backup.path()), &mut sink)
            .unwrap();
        assert_eq!(summary.items_checked, 2);
        assert_eq!(summary.mismatches, 1);
        assert_eq!(sink.equivalent, vec!["same".to_string()]);

        let mismatch = &sink.mismatches[0];
        assert_eq!(mismatch.path, "moved");
        assert_eq!(mismatch.kind, MismatchKind::SymlinkTarget);
        assert_eq!(mismatch.reference, "one.txt");
        assert_eq!(mismatch.backup, "two.txt");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_is_not_followed() {
        use std::os::unix::fs::symlink;

        let reference = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let config = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "outside").unwrap();
        symlink(outside.path(), reference.path().join("link")).unwrap();
        symlink(outside.path(), backup.path().join("link")).unwrap();

        let mut sink = CollectingSink::new();
        checker(&config)
            .check_pair(&RootPair::new(reference.path(), backup.path()), &mut sink)
            .unwrap();
        assert!(sink.checked().all(|rel| !rel.contains("secret")));
    }
}
