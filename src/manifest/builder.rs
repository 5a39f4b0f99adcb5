use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ManifestError;
use crate::manifest::source::{KeystrokeEvent, RecordingSource};
use crate::split::{assign, Recording, Split, SplitAssignment};
use crate::store;

pub const SPLIT_MAP_FILE: &str = "split_map.json";
pub const TRAIN_MANIFEST_FILE: &str = "train.jsonl";
pub const EVAL_MANIFEST_FILE: &str = "eval.jsonl";
pub const META_FILE: &str = "manifest.meta.json";

/// One line of `train.jsonl` / `eval.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub recording: String,
    pub audio_rel_path: String,
    pub audio_path: PathBuf,
    pub events: Vec<KeystrokeEvent>,
    pub duration: f64,
    pub num_events: usize,
    pub split: Split,
    pub recording_sha256: String,
}

impl ManifestRow {
    /// File stem of the audio file; feature caches are keyed by it.
    pub fn stem(&self) -> &str {
        Path::new(&self.audio_rel_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.recording)
    }
}

/// Contents of `manifest.meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMeta {
    pub schema_version: String,
    pub train_count: usize,
    pub eval_count: usize,
    pub total_events: usize,
}

/// File locations inside a manifests directory.
#[derive(Debug, Clone)]
pub struct ManifestPaths {
    pub dir: PathBuf,
}

impl ManifestPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ManifestPaths { dir: dir.into() }
    }

    pub fn split_map(&self) -> PathBuf {
        self.dir.join(SPLIT_MAP_FILE)
    }

    pub fn train(&self) -> PathBuf {
        self.dir.join(TRAIN_MANIFEST_FILE)
    }

    pub fn eval(&self) -> PathBuf {
        self.dir.join(EVAL_MANIFEST_FILE)
    }

    pub fn meta(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    /// Manifest file holding rows of `split`.
    pub fn for_split(&self, split: Split) -> PathBuf {
        match split {
            Split::Train => self.train(),
            Split::Test => self.eval(),
        }
    }
}

/// What a manifest build produced.
#[derive(Debug, Clone)]
pub struct ManifestSummary {
    pub meta: ManifestMeta,
    pub newly_assigned: usize,
    pub repaired: usize,
    pub skipped: usize,
    /// Train fraction over every name in the split store.
    pub train_fraction: f64,
}

/// Rebuild all manifests from `source`.
///
/// The split store is extended with the new cohort and written first; the
/// JSONL files and the meta document are then regenerated in full, in
/// discovery order.
pub fn build_manifests(
    source: &dyn RecordingSource,
    manifests_dir: &Path,
    train_ratio: f64,
    schema_version: &str,
) -> Result<ManifestSummary, ManifestError> {
    let paths = ManifestPaths::new(manifests_dir);
    let (existing, repaired) = SplitAssignment::load_or_repair(&paths.split_map(), train_ratio)?;

    let discovered = source.discover()?;
    let identities: Vec<Recording> = discovered.iter().map(|d| d.recording.clone()).collect();
    let outcome = assign(&identities, &existing, train_ratio)?;
    let assignment = outcome.assignment;
    assignment.save(&paths.split_map())?;

    let mut train_rows = Vec::new();
    let mut eval_rows = Vec::new();
    for found in discovered {
        let Some(split) = assignment.get(&found.recording.name) else {
            warn!(recording = %found.recording.name, "recording has no split, leaving it out of the manifests");
            continue;
        };
        let row = ManifestRow {
            recording: found.recording.name,
            audio_rel_path: found.audio_rel_path,
            audio_path: found.audio_path,
            duration: found.recording.duration,
            num_events: found.events.len(),
            events: found.events,
            split,
            recording_sha256: found.recording.fingerprint,
        };
        match split {
            Split::Train => train_rows.push(row),
            Split::Test => eval_rows.push(row),
        }
    }

    let train_count = store::write_jsonl(&paths.train(), &train_rows)?;
    let eval_count = store::write_jsonl(&paths.eval(), &eval_rows)?;
    let total_events = train_rows
        .iter()
        .chain(eval_rows.iter())
        .map(|r| r.num_events)
        .sum();
    let meta = ManifestMeta {
        schema_version: schema_version.to_string(),
        train_count,
        eval_count,
        total_events,
    };
    store::write_json(&paths.meta(), &meta)?;

    info!(
        train = train_count,
        eval = eval_count,
        new = outcome.cohort.len(),
        repaired = repaired.len(),
        "manifests rebuilt"
    );

    Ok(ManifestSummary {
        meta,
        newly_assigned: outcome.cohort.len(),
        repaired: repaired.len(),
        skipped: outcome.skipped.len(),
        train_fraction: assignment.train_fraction(),
    })
}

/// Read the rows of one split. Fails with a named error if the manifests
/// have not been built yet.
pub fn load_manifest_rows(
    manifests_dir: &Path,
    split: Split,
) -> Result<Vec<ManifestRow>, ManifestError> {
    let path = ManifestPaths::new(manifests_dir).for_split(split);
    if !path.exists() {
        return Err(ManifestError::ManifestsMissing(manifests_dir.to_path_buf()));
    }
    Ok(store::read_jsonl(&path)?)
}

/// Read `manifest.meta.json`.
pub fn load_manifest_meta(manifests_dir: &Path) -> Result<ManifestMeta, ManifestError> {
    store::read_json(&ManifestPaths::new(manifests_dir).meta())?
        .ok_or_else(|| ManifestError::ManifestsMissing(manifests_dir.to_path_buf()))
}
