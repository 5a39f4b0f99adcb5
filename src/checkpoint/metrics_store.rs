use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::checkpoint::metadata::EvalRecord;
use crate::error::StoreError;
use crate::store;

/// Durable per-step evaluation records under `<checkpoints>/metrics/`.
#[derive(Debug, Clone)]
pub struct MetricsStore {
    dir: PathBuf,
}

impl MetricsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        MetricsStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, step: u64) -> PathBuf {
        self.dir.join(format!("eval-step-{step}.json"))
    }

    pub fn write(&self, record: &EvalRecord) -> Result<PathBuf, StoreError> {
        let path = self.path_for(record.step);
        store::write_json(&path, record)?;
        Ok(path)
    }

    pub fn read(&self, step: u64) -> Result<Option<EvalRecord>, StoreError> {
        store::read_json(&self.path_for(step))
    }

    /// Every readable record, ordered by step. Unreadable files are logged
    /// and skipped.
    pub fn load_all(&self) -> Vec<EvalRecord> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("eval-step-"))
                .and_then(|n| n.strip_suffix(".json"))
                .is_some_and(|n| n.parse::<u64>().is_ok());
            if !is_record {
                continue;
            }
            match store::read_json::<EvalRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable eval record"),
            }
        }
        records.sort_by_key(|r| r.step);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::metadata::Metrics;

    fn record(step: u64, acc: f64) -> EvalRecord {
        let mut m = Metrics::new();
        m.insert("token_accuracy".to_string(), acc);
        EvalRecord::new(step, m)
    }

    #[test]
    fn test_write_and_load_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricsStore::new(dir.path().join("metrics"));
        store.write(&record(1000, 0.6)).unwrap();
        store.write(&record(250, 0.4)).unwrap();
        fs::write(store.dir().join("eval-step-9.json"), "garbage").unwrap();
        fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        assert!(store.path_for(250).ends_with("eval-step-250.json"));
        let all = store.load_all();
        let steps: Vec<u64> = all.iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![250, 1000]);
        assert_eq!(store.read(1000).unwrap(), Some(record(1000, 0.6)));
    }

    #[test]
    fn test_load_all_without_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MetricsStore::new(dir.path().join("none")).load_all().is_empty());
    }
}
