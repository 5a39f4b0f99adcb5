use std::path::PathBuf;

/// Errors raised by the JSON persistence helpers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while loading or repairing the split assignment.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("train_ratio must be in (0, 1), got {0}")]
    InvalidRatio(f64),

    #[error("split store {path} is not a JSON object")]
    NotAnObject { path: PathBuf },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that can occur while building or reading manifests.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("recordings directory not found: {0}")]
    RecordingsDirNotFound(PathBuf),

    #[error("manifests missing in {0}; build manifests first")]
    ManifestsMissing(PathBuf),

    #[error("split error: {0}")]
    Split(#[from] SplitError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during checkpoint lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint directory not found: {0}")]
    DirNotFound(PathBuf),

    #[error("no '{pointer}' pointer found in {dir}")]
    NoPointer { pointer: String, dir: PathBuf },

    #[error("pointer '{pointer}' in {dir} refers to missing checkpoint {target}")]
    DanglingPointer {
        pointer: String,
        dir: PathBuf,
        target: PathBuf,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}
