use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::manifest::builder::ManifestRow;

/// Materializes the training tensors for one manifest row. Implemented by
/// the feature-extraction side; this crate only decides what is missing.
pub trait FeatureCacheBuilder {
    fn build(
        &self,
        row: &ManifestRow,
        dest: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Location of the cached blob for `row`: `<tokens_dir>/<split>/<stem>.pt`.
pub fn cache_path(tokens_dir: &Path, row: &ManifestRow) -> PathBuf {
    tokens_dir
        .join(row.split.as_str())
        .join(format!("{}.pt", row.stem()))
}

/// Cache paths for `rows` that do not exist yet, in row order.
pub fn missing_feature_caches(rows: &[ManifestRow], tokens_dir: &Path) -> Vec<PathBuf> {
    rows.iter()
        .map(|row| cache_path(tokens_dir, row))
        .filter(|path| !path.exists())
        .collect()
}

/// Outcome of a cache pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheReport {
    pub built: usize,
    pub reused: usize,
    pub failed: Vec<String>,
}

/// Build every missing feature cache. Failures are logged and the row is
/// skipped; the pass itself never fails.
pub fn ensure_feature_caches(
    rows: &[ManifestRow],
    tokens_dir: &Path,
    builder: &dyn FeatureCacheBuilder,
) -> CacheReport {
    let mut report = CacheReport::default();
    for row in rows {
        let dest = cache_path(tokens_dir, row);
        if dest.exists() {
            report.reused += 1;
            continue;
        }
        if let Some(parent) = dest.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(dir = %parent.display(), error = %e, "cannot create cache directory");
                report.failed.push(row.recording.clone());
                continue;
            }
        }
        match builder.build(row, &dest) {
            Ok(()) => {
                debug!(recording = %row.recording, path = %dest.display(), "feature cache built");
                report.built += 1;
            }
            Err(e) => {
                warn!(recording = %row.recording, error = %e, "feature cache build failed");
                report.failed.push(row.recording.clone());
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::Split;
    use std::cell::RefCell;

    struct Recorder {
        seen: RefCell<Vec<String>>,
    }

    impl FeatureCacheBuilder for Recorder {
        fn build(
            &self,
            row: &ManifestRow,
            dest: &Path,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if row.recording == "bad" {
                return Err("decode failed".into());
            }
            self.seen.borrow_mut().push(row.recording.clone());
            std::fs::write(dest, b"tensor")?;
            Ok(())
        }
    }

    fn row(name: &str, split: Split) -> ManifestRow {
        ManifestRow {
            recording: name.to_string(),
            audio_rel_path: format!("{name}.webm"),
            audio_path: PathBuf::from(format!("/data/{name}.webm")),
            events: Vec::new(),
            duration: 1.0,
            num_events: 0,
            split,
            recording_sha256: "00".to_string(),
        }
    }

    #[test]
    fn test_cache_path_layout() {
        let p = cache_path(Path::new("tokens"), &row("rec", Split::Test));
        assert_eq!(p, PathBuf::from("tokens/test/rec.pt"));
    }

    #[test]
    fn test_missing_feature_caches() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![row("a", Split::Train), row("b", Split::Test)];
        std::fs::create_dir_all(dir.path().join("train")).unwrap();
        std::fs::write(dir.path().join("train").join("a.pt"), b"tensor").unwrap();

        assert_eq!(
            missing_feature_caches(&rows, dir.path()),
            vec![dir.path().join("test").join("b.pt")]
        );
    }

    #[test]
    fn test_builds_missing_and_reuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![row("a", Split::Train), row("b", Split::Test), row("bad", Split::Train)];
        let builder = Recorder {
            seen: RefCell::new(Vec::new()),
        };

        let first = ensure_feature_caches(&rows, dir.path(), &builder);
        assert_eq!(first.built, 2);
        assert_eq!(first.failed, vec!["bad".to_string()]);
        assert!(dir.path().join("train").join("a.pt").exists());

        let second = ensure_feature_caches(&rows, dir.path(), &builder);
        assert_eq!(second.built, 0);
        assert_eq!(second.reused, 2);
        assert_eq!(builder.seen.borrow().len(), 2);
    }
}
