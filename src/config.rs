use std::path::{Path, PathBuf};

use tracing::warn;

use crate::checkpoint::{CheckpointManagerConfig, EarlyStoppingConfig};
use crate::error::ConfigError;

/// Filesystem layout of the data and run directories.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub recordings_dir: PathBuf,
    pub manifests_dir: PathBuf,
    pub tokens_dir: PathBuf,
    pub checkpoints_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            recordings_dir: PathBuf::from("data/raw"),
            manifests_dir: PathBuf::from("data/manifests"),
            tokens_dir: PathBuf::from("data/tokens"),
            checkpoints_dir: PathBuf::from("checkpoints"),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Target fraction of each new cohort assigned to train.
    pub train_ratio: f64,
    /// Written into `manifest.meta.json`.
    pub schema_version: String,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            train_ratio: 0.9,
            schema_version: "2024-05-17".to_string(),
        }
    }
}

/// Top-level application configuration, loadable from TOML.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub split: SplitConfig,
    pub checkpoint: CheckpointManagerConfig,
    pub early_stopping: EarlyStoppingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Checkpoint lifecycle settings with the directory from `[paths]`.
    pub fn checkpoint_config(&self) -> CheckpointManagerConfig {
        CheckpointManagerConfig {
            checkpoint_dir: self.paths.checkpoints_dir.clone(),
            ..self.checkpoint.clone()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.split.train_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(ConfigError::Validation(
                "split.train_ratio must be in (0, 1)".into(),
            ));
        }
        if self.split.schema_version.trim().is_empty() {
            return Err(ConfigError::Validation(
                "split.schema_version must not be empty".into(),
            ));
        }

        if self.checkpoint.keep_last_n == 0 {
            return Err(ConfigError::Validation(
                "checkpoint.keep_last_n must be >= 1".into(),
            ));
        }
        let metrics_dir = self.checkpoint.metrics_dir_name.as_str();
        if metrics_dir.is_empty()
            || metrics_dir.contains(['/', '\\'])
            || metrics_dir == "latest"
            || metrics_dir == "best"
        {
            return Err(ConfigError::Validation(
                "checkpoint.metrics_dir_name must be a plain directory name other than 'latest' or 'best'".into(),
            ));
        }

        let early = &self.early_stopping;
        if early.patience == 0 {
            return Err(ConfigError::Validation(
                "early_stopping.patience must be >= 1".into(),
            ));
        }
        if !(early.min_delta >= 0.0) {
            return Err(ConfigError::Validation(
                "early_stopping.min_delta must be >= 0".into(),
            ));
        }
        if !(early.regression_threshold >= 0.0) {
            return Err(ConfigError::Validation(
                "early_stopping.regression_threshold must be >= 0".into(),
            ));
        }
        if let Some(target) = early.target_token_accuracy {
            if !(target > 0.0 && target <= 1.0) {
                return Err(ConfigError::Validation(
                    "early_stopping.target_token_accuracy must be in (0, 1]".into(),
                ));
            }
        }

        Ok(())
    }

    /// Generate a TOML string with all default values (useful for creating
    /// example config files).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&AppConfig::default()).expect("default config serializes")
    }
}
