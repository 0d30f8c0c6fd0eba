//! Chaos testing for backup-chk
//!
//! Interrupts, crashes, corrupted state and trees that change underneath a
//! running check. Every scenario must either fail loudly or finish with a
//! complete, correct result, and a later run must recover.

use crate::integration::{CheckHarness, TreeConfig};
use ::backup_chk::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{info, warn};

/// Sink that raises the shutdown flag after a number of checked items
pub struct InterruptingSink {
    pub inner: CollectingSink,
    pub shutdown: ShutdownSignal,
    pub after: usize,
}

impl InterruptingSink {
    pub fn new(shutdown: ShutdownSignal, after: usize) -> Self {
        Self {
            inner: CollectingSink::new(),
            shutdown,
            after,
        }
    }

    fn tick(&mut self) {
        if self.inner.checked().count() >= self.after && !self.shutdown.is_triggered() {
            info!("Interrupting after {} items", self.after);
            self.shutdown.trigger();
        }
    }
}

impl ReportSink for InterruptingSink {
    fn begin(&mut self, pair: &RootPair, state_dir: &std::path::Path) -> Result<()> {
        self.inner.begin(pair, state_dir)
    }

    fn equivalent(&mut self, relative_path: &str) {
        self.inner.equivalent(relative_path);
        self.tick();
    }

    fn mismatch(&mut self, mismatch: &Mismatch) -> Result<()> {
        self.inner.mismatch(mismatch)?;
        self.tick();
        Ok(())
    }

    fn finish(&mut self, summary: &CheckSummary) {
        self.inner.finish(summary)
    }
}

/// Sink that rejects every mismatch, as a failing writer would
struct FailingSink;

impl ReportSink for FailingSink {
    fn mismatch(&mut self, _mismatch: &Mismatch) -> Result<()> {
        Err(CheckError::internal("report destination is gone"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_then_resume_covers_everything() {
        let mut harness = CheckHarness::new(21);
        harness.generate_mirrored(TreeConfig::default()).unwrap();
        let damage = harness.damage_backup(4).unwrap();

        let shutdown = ShutdownSignal::new();
        let checker = harness.builder().shutdown(shutdown.clone()).build().unwrap();
        let mut first = InterruptingSink::new(shutdown, 15);
        let err = checker.check_pair(&harness.pair(), &mut first).unwrap_err();
        assert!(matches!(err, CheckError::Interrupted));
        assert!(first.inner.summaries.is_empty());

        let mut second = CollectingSink::new();
        let summary = harness.checker().check_pair(&harness.pair(), &mut second).unwrap();
        assert!(summary.resumed);

        let covered: BTreeSet<String> = first
            .inner
            .checked()
            .chain(second.checked())
            .map(str::to_string)
            .collect();
        assert_eq!(covered, harness.entries);

        let reported: BTreeSet<String> = first
            .inner
            .mismatches
            .iter()
            .chain(second.mismatches.iter())
            .map(|m| m.path.clone())
            .collect();
        let damaged: BTreeSet<String> = damage.iter().map(|d| d.path().to_string()).collect();
        assert_eq!(reported, damaged);
    }

    #[test]
    fn test_repeated_interrupts_make_progress() {
        let mut harness = CheckHarness::new(22);
        harness.generate_mirrored(TreeConfig::default()).unwrap();

        let mut covered = BTreeSet::new();
        let mut runs = 0;
        loop {
            runs += 1;
            assert!(runs < 100, "walk does not converge");
            let shutdown = ShutdownSignal::new();
            let checker = harness.builder().shutdown(shutdown.clone()).build().unwrap();
            let mut sink = InterruptingSink::new(shutdown, 7);
            let result = checker.check_pair(&harness.pair(), &mut sink);
            covered.extend(sink.inner.checked().map(str::to_string));
            match result {
                Ok(_) => break,
                Err(CheckError::Interrupted) => continue,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert!(runs > 1);
        assert_eq!(covered, harness.entries);
    }

    #[test]
    fn test_crash_after_checkpoint_resumes() {
        let mut harness = CheckHarness::new(23);
        harness.generate_mirrored(TreeConfig::default()).unwrap();
        let state = TempDir::new().unwrap();

        let mut visited = BTreeSet::new();
        let root = FsItem::root(harness.reference.path()).unwrap();
        let mut walker = TreeWalker::open(root, state.path(), ExcludeMatcher::default()).unwrap();
        for _ in 0..25 {
            let item = walker.next().unwrap().unwrap();
            visited.insert(item.relative_path().to_string());
        }
        walker.checkpoint();
        // Yielded after the checkpoint, then lost in the crash
        for _ in 0..5 {
            walker.next().unwrap().unwrap();
        }
        std::mem::forget(walker);

        let root = FsItem::root(harness.reference.path()).unwrap();
        let mut walker = TreeWalker::open(root, state.path(), ExcludeMatcher::default()).unwrap();
        assert!(walker.resumed());
        while let Some(item) = walker.next().unwrap() {
            visited.insert(item.relative_path().to_string());
        }
        visited.remove("");
        assert_eq!(visited, harness.entries);
    }

    #[test]
    fn test_corrupted_walk_stack() {
        let mut harness = CheckHarness::new(24);
        harness.generate_mirrored(TreeConfig::default()).unwrap();
        let state_dir = harness.state_dir();
        fs::create_dir_all(&state_dir).unwrap();
        fs::write(
            state_dir.join(TraversalLog::FILE_NAME),
            b"dir_0_0/fil\xff\xfe\n\n   \ngarbage\0bytes\nno/such/entry\n",
        )
        .unwrap();

        let err = harness
            .checker()
            .check_pair(&harness.pair(), &mut CollectingSink::new())
            .unwrap_err();
        assert!(matches!(err, CheckError::Stat { .. }), "got {:?}", err);
        assert!(err.is_fatal_for_walk());

        // The bad entry is kept, so the same run fails again
        let again = harness
            .checker()
            .check_pair(&harness.pair(), &mut CollectingSink::new());
        assert!(again.is_err());

        let mut sink = CollectingSink::new();
        let summary = harness
            .builder()
            .resume(false)
            .build()
            .unwrap()
            .check_pair(&harness.pair(), &mut sink)
            .unwrap();
        assert!(!summary.resumed);
        assert!(summary.is_clean());
        assert_eq!(summary.items_checked as usize, harness.entries.len());
    }

    #[test]
    fn test_walk_stack_of_random_bytes() {
        let mut harness = CheckHarness::new(25);
        harness.generate_mirrored(TreeConfig::default()).unwrap();
        let state_dir = harness.state_dir();
        fs::create_dir_all(&state_dir).unwrap();

        // Letters only, so no line can name an absolute or parent path
        let mut rng = StdRng::seed_from_u64(25);
        let noise: String = (0..2048)
            .map(|_| match rng.random_range(0..30) {
                0 => '\n',
                n => (b'a' + (n % 26) as u8) as char,
            })
            .collect();
        fs::write(state_dir.join(TraversalLog::FILE_NAME), noise).unwrap();

        match harness
            .checker()
            .check_pair(&harness.pair(), &mut CollectingSink::new())
        {
            Ok(summary) => info!("Noise resumed cleanly: {}", summary.summary()),
            Err(e) => warn!("Noise rejected: {}", e),
        }

        let summary = harness
            .builder()
            .resume(false)
            .build()
            .unwrap()
            .check_pair(&harness.pair(), &mut CollectingSink::new())
            .unwrap();
        assert!(summary.is_clean());
        assert_eq!(summary.items_checked as usize, harness.entries.len());
    }

    #[test]
    fn test_backup_truncated_after_stat() {
        let reference = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let content: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
        fs::write(reference.path().join("data.bin"), &content).unwrap();
        fs::write(backup.path().join("data.bin"), &content).unwrap();
        filetime::set_file_mtime(
            reference.path().join("data.bin"),
            filetime::FileTime::from_unix_time(1_000_000, 0),
        )
        .unwrap();

        let ref_root: Arc<std::path::Path> = Arc::from(reference.path());
        let backup_root: Arc<std::path::Path> = Arc::from(backup.path());
        let mut ref_item = FsItem::from_relative(ref_root, "data.bin");
        let mut backup_item = ref_item.counterpart(&backup_root);
        assert_eq!(ref_item.stat().unwrap().size, 8192);
        assert_eq!(backup_item.stat().unwrap().size, 8192);

        fs::OpenOptions::new()
            .write(true)
            .open(backup.path().join("data.bin"))
            .unwrap()
            .set_len(5000)
            .unwrap();

        let outcome = Comparator::default().compare(&mut ref_item, &mut backup_item).unwrap();
        let Outcome::Mismatch(mismatch) = outcome else {
            panic!("truncation went unnoticed");
        };
        assert_eq!(mismatch.kind, MismatchKind::Chunk { offset: 4096 });
        assert_eq!(mismatch.reference, "(chunk of size 4096)");
        assert_eq!(mismatch.backup, "(chunk of size 904)");
    }

    #[test]
    fn test_failing_sink_aborts_and_keeps_state() {
        let mut harness = CheckHarness::new(26);
        harness.generate_mirrored(TreeConfig::default()).unwrap();
        let damage = harness.damage_backup(1).unwrap();

        let err = harness
            .checker()
            .check_pair(&harness.pair(), &mut FailingSink)
            .unwrap_err();
        assert!(matches!(err, CheckError::Internal(_)));

        let log = fs::read_to_string(harness.state_dir().join(TraversalLog::FILE_NAME)).unwrap();
        assert!(log.lines().any(|line| line == damage[0].path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_reference_file() {
        use std::os::unix::fs::PermissionsExt;

        let mut harness = CheckHarness::new(27);
        harness.generate_mirrored(TreeConfig::default()).unwrap();
        let victim = harness.files()[0].clone();
        let path = harness.reference.path().join(&victim);
        let backup_path = harness.backup.path().join(&victim);
        // Both sides, so the mode bits still agree
        let set_mode = |mode: u32| {
            for p in [&path, &backup_path] {
                fs::set_permissions(p, fs::Permissions::from_mode(mode)).unwrap();
            }
        };
        set_mode(0o000);
        if fs::read(&path).is_ok() {
            // Running as root, permissions are not enforced
            set_mode(0o644);
            return;
        }

        let err = harness
            .checker()
            .check_pair(&harness.pair(), &mut CollectingSink::new())
            .unwrap_err();
        assert!(matches!(err, CheckError::Open { .. }), "got {:?}", err);
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::PermissionDenied));

        // Restoring access lets the resumed run finish
        set_mode(0o644);
        let mut sink = CollectingSink::new();
        let summary = harness.checker().check_pair(&harness.pair(), &mut sink).unwrap();
        assert!(summary.resumed);
        assert!(sink.checked().any(|rel| rel == victim));
    }
}
