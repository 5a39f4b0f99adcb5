use std::path::Path;

use serde::Serialize;

use crate::error::ManifestError;
use crate::manifest::source::{list_with_extension, DirectorySource, DurationProbe, RecordingSource};

/// Summary of a recordings directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetStats {
    pub paired_records: usize,
    pub total_duration_sec: f64,
    pub total_duration_hours: f64,
    pub total_events: usize,
    pub avg_events_per_record: f64,
    /// Keystroke logs without audio.
    pub missing_audio: Vec<String>,
    /// Audio files without a keystroke log.
    pub missing_json: Vec<String>,
}

pub fn dataset_stats<P: DurationProbe>(
    source: &DirectorySource<P>,
) -> Result<DatasetStats, ManifestError> {
    let mut stats = DatasetStats::default();
    for json in source.json_files()? {
        if !json.with_extension("webm").exists() {
            stats.missing_audio.push(file_name(&json));
        }
    }
    for webm in list_with_extension(source.dir(), "webm")? {
        if !webm.with_extension("json").exists() {
            stats.missing_json.push(file_name(&webm));
        }
    }

    for found in source.discover()? {
        stats.paired_records += 1;
        stats.total_events += found.recording.num_events;
        stats.total_duration_sec += found.recording.duration;
    }
    stats.total_duration_hours = stats.total_duration_sec / 3600.0;
    if stats.paired_records > 0 {
        stats.avg_events_per_record = stats.total_events as f64 / stats.paired_records as f64;
    }
    Ok(stats)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::source::NullProbe;
    use crate::manifest::test_support::write_recording;

    #[test]
    fn test_stats_counts_pairs_and_orphans() {
        let dir = tempfile::tempdir().unwrap();
        write_recording(dir.path(), "one", &[("KeyA", "keydown", 0), ("KeyA", "keyup", 40)], true);
        write_recording(dir.path(), "two", &[("KeyB", "keydown", 0)], true);
        write_recording(dir.path(), "lonely", &[], false);
        std::fs::write(dir.path().join("orphan.webm"), b"webm").unwrap();

        let stats = dataset_stats(&DirectorySource::with_probe(dir.path(), NullProbe)).unwrap();
        assert_eq!(stats.paired_records, 2);
        assert_eq!(stats.total_events, 3);
        assert!((stats.avg_events_per_record - 1.5).abs() < 1e-9);
        assert_eq!(stats.missing_audio, vec!["lonely.json".to_string()]);
        assert_eq!(stats.missing_json, vec!["orphan.webm".to_string()]);
    }
}
