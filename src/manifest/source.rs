use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::ManifestError;
use crate::split::Recording;

/// Key state of a normalized keystroke event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    Down,
    Up,
}

/// One keystroke relative to the start of its recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystrokeEvent {
    /// Seconds since the first event.
    pub time: f64,
    pub code: String,
    #[serde(rename = "type")]
    pub state: KeyState,
}

/// A paired `<stem>.json` + `<stem>.webm` recording found on disk.
#[derive(Debug, Clone)]
pub struct DiscoveredRecording {
    pub recording: Recording,
    pub audio_rel_path: String,
    pub audio_path: PathBuf,
    pub events: Vec<KeystrokeEvent>,
}

/// Measures audio length. Audio decoding itself is not this crate's job.
pub trait DurationProbe {
    /// Duration in seconds, or 0.0 if it cannot be determined.
    fn duration_seconds(&self, audio: &Path) -> f64;
}

/// Asks `ffprobe` for the container duration.
#[derive(Debug, Clone, Default)]
pub struct FfprobeProbe;

impl DurationProbe for FfprobeProbe {
    fn duration_seconds(&self, audio: &Path) -> f64 {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(audio)
            .output();
        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .trim()
                .parse()
                .unwrap_or(0.0),
            Ok(out) => {
                warn!(audio = %audio.display(), status = %out.status, "ffprobe failed");
                0.0
            }
            Err(e) => {
                warn!(audio = %audio.display(), error = %e, "could not run ffprobe");
                0.0
            }
        }
    }
}

/// Reports zero for every file. Used when durations are not needed.
#[derive(Debug, Clone, Default)]
pub struct NullProbe;

impl DurationProbe for NullProbe {
    fn duration_seconds(&self, _audio: &Path) -> f64 {
        0.0
    }
}

/// Yields the recordings a manifest build should cover.
pub trait RecordingSource {
    fn discover(&self) -> Result<Vec<DiscoveredRecording>, ManifestError>;
}

/// Scans a directory for `*.json` keystroke logs with a sibling `.webm`.
pub struct DirectorySource<P: DurationProbe = FfprobeProbe> {
    dir: PathBuf,
    probe: P,
}

impl DirectorySource<FfprobeProbe> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectorySource {
            dir: dir.into(),
            probe: FfprobeProbe,
        }
    }
}

impl<P: DurationProbe> DirectorySource<P> {
    pub fn with_probe(dir: impl Into<PathBuf>, probe: P) -> Self {
        DirectorySource {
            dir: dir.into(),
            probe,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sorted paths of every `*.json` file in the directory.
    pub(crate) fn json_files(&self) -> Result<Vec<PathBuf>, ManifestError> {
        list_with_extension(&self.dir, "json")
    }

    fn load(&self, json_path: &Path) -> Option<DiscoveredRecording> {
        // recordings are named by their keystroke log's file name, e.g. `a.json`
        let name = json_path.file_name()?.to_string_lossy().into_owned();
        let stem = json_path.file_stem()?.to_string_lossy().into_owned();
        let audio_path = json_path.with_extension("webm");
        if !audio_path.exists() {
            debug!(recording = %stem, "no audio next to keystroke log, skipping");
            return None;
        }
        let payload: serde_json::Value = match fs::read_to_string(json_path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!(path = %json_path.display(), error = %e, "skipping unreadable keystroke log");
                return None;
            }
        };

        let events = match payload.get("keystrokes") {
            Some(serde_json::Value::Array(items)) => normalize_events(items),
            Some(_) => {
                warn!(recording = %stem, "'keystrokes' is not an array, treating as empty");
                Vec::new()
            }
            None => Vec::new(),
        };
        let duration = self.probe.duration_seconds(&audio_path);
        let audio_abs = fs::canonicalize(&audio_path).unwrap_or_else(|_| audio_path.clone());
        let audio_rel_path = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Some(DiscoveredRecording {
            recording: Recording {
                name,
                fingerprint: payload_fingerprint(&payload),
                duration,
                num_events: events.len(),
            },
            audio_rel_path,
            audio_path: audio_abs,
            events,
        })
    }
}

impl<P: DurationProbe> RecordingSource for DirectorySource<P> {
    fn discover(&self) -> Result<Vec<DiscoveredRecording>, ManifestError> {
        Ok(self
            .json_files()?
            .iter()
            .filter_map(|path| self.load(path))
            .collect())
    }
}

pub(crate) fn list_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, ManifestError> {
    if !dir.is_dir() {
        return Err(ManifestError::RecordingsDirNotFound(dir.to_path_buf()));
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// SHA-256 over the payload with object keys in sorted order.
pub fn payload_fingerprint(payload: &serde_json::Value) -> String {
    let canonical = payload.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Convert raw keystroke objects into a timeline relative to the first one.
pub fn normalize_events(raw: &[serde_json::Value]) -> Vec<KeystrokeEvent> {
    let Some(first) = raw.first() else {
        return Vec::new();
    };
    let base = first.get("timestamp").and_then(|t| t.as_f64()).unwrap_or(0.0);
    raw.iter()
        .map(|event| {
            let ts = event.get("timestamp").and_then(|t| t.as_f64()).unwrap_or(base);
            let kind = event
                .get("event_type")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_lowercase();
            KeystrokeEvent {
                time: (ts - base) / 1000.0,
                code: event
                    .get("key")
                    .and_then(|k| k.as_str())
                    .unwrap_or("Unidentified")
                    .to_string(),
                state: if kind.contains("down") {
                    KeyState::Down
                } else {
                    KeyState::Up
                },
            }
        })
        .collect()
}
