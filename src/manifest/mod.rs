//! Recording discovery, manifest generation and feature-cache planning.
//!
//! A manifest build scans the recordings directory, extends the split store
//! with any newly seen recordings, and regenerates `train.jsonl`,
//! `eval.jsonl` and `manifest.meta.json` from scratch.

mod builder;
mod cache;
mod source;
mod stats;

pub use builder::{
    build_manifests, load_manifest_meta, load_manifest_rows, ManifestMeta, ManifestPaths,
    ManifestRow, ManifestSummary, EVAL_MANIFEST_FILE, META_FILE, SPLIT_MAP_FILE,
    TRAIN_MANIFEST_FILE,
};
pub use cache::{
    cache_path, ensure_feature_caches, missing_feature_caches, CacheReport, FeatureCacheBuilder,
};
pub use source::{
    normalize_events, payload_fingerprint, DirectorySource, DiscoveredRecording, DurationProbe,
    FfprobeProbe, KeyState, KeystrokeEvent, NullProbe, RecordingSource,
};
pub use stats::{dataset_stats, DatasetStats};
