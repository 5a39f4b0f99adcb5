use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// A registered checkpoint directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedCheckpoint {
    pub step: u64,
    pub path: PathBuf,
}

/// What a prune pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: Vec<PathBuf>,
    /// Directories whose removal failed; they are retried on the next pass.
    pub failed: Vec<PathBuf>,
    /// Step of the `best` checkpoint that was moved to the back instead of
    /// being evicted.
    pub protected: Option<u64>,
}

/// Bounded, insertion-ordered window of retained checkpoints.
#[derive(Debug, Clone)]
pub struct RetentionWindow {
    entries: VecDeque<RetainedCheckpoint>,
    capacity: usize,
    undeleted: Vec<PathBuf>,
}

impl RetentionWindow {
    pub fn new(capacity: usize) -> Self {
        RetentionWindow {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            undeleted: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, step: u64) -> bool {
        self.entries.iter().any(|e| e.step == step)
    }

    pub fn get(&self, step: u64) -> Option<&RetainedCheckpoint> {
        self.entries.iter().find(|e| e.step == step)
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RetainedCheckpoint> {
        self.entries.iter()
    }

    /// Directories awaiting a retried deletion.
    pub fn undeleted(&self) -> &[PathBuf] {
        &self.undeleted
    }

    /// Add a checkpoint at the back. Returns `false` if the step is already
    /// registered.
    pub fn register(&mut self, step: u64, path: PathBuf) -> bool {
        if self.contains(step) {
            return false;
        }
        self.entries.push_back(RetainedCheckpoint { step, path });
        true
    }

    /// Evict from the front until at most `capacity` entries remain.
    ///
    /// The `best` entry is never deleted: when it reaches the front it is
    /// moved to the back and the pass ends.
    pub fn prune(&mut self, best: Option<u64>) -> PruneReport {
        let mut report = PruneReport::default();

        let retry = std::mem::take(&mut self.undeleted);
        for path in retry {
            match remove_checkpoint_dir(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "deleted checkpoint on retry");
                    report.deleted.push(path);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "checkpoint still not deletable");
                    report.failed.push(path.clone());
                    self.undeleted.push(path);
                }
            }
        }

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.entries.pop_front() else {
                break;
            };
            if Some(oldest.step) == best {
                report.protected = Some(oldest.step);
                self.entries.push_back(oldest);
                break;
            }
            match remove_checkpoint_dir(&oldest.path) {
                Ok(()) => {
                    info!(step = oldest.step, path = %oldest.path.display(), "pruned checkpoint");
                    report.deleted.push(oldest.path);
                }
                Err(e) => {
                    warn!(step = oldest.step, path = %oldest.path.display(), error = %e, "failed to prune checkpoint");
                    report.failed.push(oldest.path.clone());
                    self.undeleted.push(oldest.path);
                }
            }
        }
        report
    }
}

/// Remove a checkpoint tree, retrying once. A directory that is already gone
/// counts as removed.
fn remove_checkpoint_dir(path: &Path) -> io::Result<()> {
    let attempt = || match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    };
    attempt().or_else(|_| attempt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make(dir: &Path, step: u64) -> PathBuf {
        let p = dir.join(format!("step-{step:06}"));
        fs::create_dir_all(&p).unwrap();
        fs::write(p.join("model.bin"), b"w").unwrap();
        p
    }

    #[test]
    fn test_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = RetentionWindow::new(2);
        for step in [100, 200, 300] {
            w.register(step, make(dir.path(), step));
        }
        let report = w.prune(None);
        assert_eq!(report.deleted, vec![dir.path().join("step-000100")]);
        assert!(!dir.path().join("step-000100").exists());
        let steps: Vec<u64> = w.iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![200, 300]);
    }

    #[test]
    fn test_best_is_moved_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = RetentionWindow::new(2);
        for step in [100, 200, 300] {
            w.register(step, make(dir.path(), step));
        }
        let report = w.prune(Some(100));
        assert_eq!(report.protected, Some(100));
        assert!(report.deleted.is_empty());
        assert!(dir.path().join("step-000100").exists());
        let steps: Vec<u64> = w.iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![200, 300, 100]);

        w.register(400, make(dir.path(), 400));
        let report = w.prune(Some(100));
        assert_eq!(
            report.deleted,
            vec![dir.path().join("step-000200"), dir.path().join("step-000300")]
        );
        let steps: Vec<u64> = w.iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![100, 400]);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut w = RetentionWindow::new(3);
        assert!(w.register(5, PathBuf::from("a")));
        assert!(!w.register(5, PathBuf::from("a")));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_already_missing_dir_counts_as_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = RetentionWindow::new(1);
        w.register(1, dir.path().join("gone"));
        w.register(2, make(dir.path(), 2));
        let report = w.prune(None);
        assert_eq!(report.deleted.len(), 1);
        assert!(report.failed.is_empty());
    }

    proptest! {
        #[test]
        fn prop_non_best_bounded_and_best_kept(
            capacity in 1usize..5,
            improving in proptest::collection::vec(any::<bool>(), 1..30),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let mut w = RetentionWindow::new(capacity);
            let mut best = None;
            for (i, improves) in improving.iter().enumerate() {
                let step = (i as u64 + 1) * 10;
                w.register(step, make(dir.path(), step));
                if *improves || best.is_none() {
                    best = Some(step);
                }
                w.prune(best);

                let non_best = w.iter().filter(|e| Some(e.step) != best).count();
                prop_assert!(non_best <= capacity);
                let best_step = best.unwrap();
                prop_assert!(w.contains(best_step));
                let best_dir = dir.path().join(format!("step-{best_step:06}"));
                prop_assert!(best_dir.exists());
                prop_assert!(w.contains(step), "latest must survive");
            }
        }
    }
}
