//! Effective configuration with provenance
//!
//! The merged configuration plus the list of layers that contributed to it.
//! The merged JSON is deserialized into a typed [`BatchConfig`] and validated
//! before anything runs.

use ep_scan::{MarkerError, MarkerSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use crate::registry::DiscoveryOptions;
use crate::scheduler::{clamp_workers, default_max_workers, SchedulerConfig};
use crate::timeout::{TimeoutConfig, TimeoutValidationError};

/// Config file picked up from the input directory when `--config` is absent
pub const CONFIG_FILE_NAME: &str = "ep-batch.toml";

/// Sampling interval bounds in milliseconds
pub const MIN_SAMPLE_INTERVAL_MS: u64 = 10;
pub const MAX_SAMPLE_INTERVAL_MS: u64 = 60_000;

/// Upper bound for the termination grace period
pub const MAX_TERMINATION_GRACE_SECONDS: u64 = 300;

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing config source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Model discovery keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    pub model_glob: String,
    pub weather_glob: String,
    pub recursive: bool,
    #[serde(default)]
    pub weather_file: Option<PathBuf>,
}

/// Output file keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// A bare file name lands in the input directory
    pub csv_path: PathBuf,
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
}

/// Typed batch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Engine executable or installation directory
    #[serde(default)]
    pub engine_path: Option<PathBuf>,
    /// Worker ceiling; unset means logical cores minus one
    #[serde(default)]
    pub max_workers: Option<usize>,
    pub sample_interval_ms: u64,
    #[serde(default)]
    pub job_timeout_seconds: Option<u64>,
    pub termination_grace_seconds: u64,
    pub keep_staging: bool,
    /// Parent of the per-run staging directories; unset means the system temp dir
    #[serde(default)]
    pub staging_root: Option<PathBuf>,
    /// Shared engine output directory; unset means each model's directory
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    pub engine_args: Vec<String>,
    pub terminate_on_fatal: bool,
    pub discovery: DiscoveryConfig,
    pub report: ReportConfig,
    pub markers: MarkerSet,
}

impl BatchConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == Some(0) {
            return Err(ConfigError::Invalid(
                "max_workers must be at least 1".to_string(),
            ));
        }

        if !(MIN_SAMPLE_INTERVAL_MS..=MAX_SAMPLE_INTERVAL_MS).contains(&self.sample_interval_ms) {
            return Err(ConfigError::Invalid(format!(
                "sample_interval_ms must be in [{}, {}]",
                MIN_SAMPLE_INTERVAL_MS, MAX_SAMPLE_INTERVAL_MS
            )));
        }

        self.timeout().validate()?;

        if self.termination_grace_seconds > MAX_TERMINATION_GRACE_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "termination_grace_seconds must be at most {}",
                MAX_TERMINATION_GRACE_SECONDS
            )));
        }

        if self.engine_args.is_empty() {
            return Err(ConfigError::Invalid(
                "engine_args must not be empty".to_string(),
            ));
        }

        if self.discovery.model_glob.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "discovery.model_glob must not be empty".to_string(),
            ));
        }

        self.markers.validate()?;
        Ok(())
    }

    /// The configured engine path, required for `run`.
    pub fn require_engine(&self) -> Result<&Path, ConfigError> {
        self.engine_path
            .as_deref()
            .ok_or(ConfigError::MissingEnginePath)
    }

    pub fn timeout(&self) -> TimeoutConfig {
        TimeoutConfig::new(self.job_timeout_seconds)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_seconds)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.staging_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Worker ceiling for a batch of `job_count` jobs.
    pub fn worker_ceiling(&self, job_count: usize) -> usize {
        match self.max_workers {
            Some(requested) => clamp_workers(requested, job_count),
            None => default_max_workers(job_count),
        }
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            model_glob: self.discovery.model_glob.clone(),
            weather_glob: self.discovery.weather_glob.clone(),
            recursive: self.discovery.recursive,
            weather_file: self.discovery.weather_file.clone(),
        }
    }

    pub fn scheduler_config(&self, job_count: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_workers: self.worker_ceiling(job_count),
            sample_interval: self.sample_interval(),
            timeout: self.timeout(),
            keep_staging: self.keep_staging,
            terminate_on_fatal: self.terminate_on_fatal,
        }
    }

    /// Report path; a bare file name is placed in `input_dir`.
    pub fn csv_path(&self, input_dir: &Path) -> PathBuf {
        resolve_output_path(&self.report.csv_path, input_dir)
    }

    pub fn summary_path(&self, input_dir: &Path) -> Option<PathBuf> {
        self.report
            .summary_path
            .as_deref()
            .map(|p| resolve_output_path(p, input_dir))
    }
}

fn resolve_output_path(path: &Path, input_dir: &Path) -> PathBuf {
    let bare = path
        .parent()
        .map(|p| p.as_os_str().is_empty())
        .unwrap_or(true);
    if bare {
        input_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Effective configuration with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// The typed, validated configuration
    pub config: BatchConfig,

    /// The merged configuration object
    pub merged: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Build effective config from layers: defaults, optional file, CLI.
    pub fn build(file_path: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        // Layer 1: Built-in defaults
        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
        });

        // Layer 2: Config file
        if let Some(path) = file_path {
            layers.push(Self::load_toml_file(path)?);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_path_buf()),
            });
        }

        // Layer 3: CLI overrides
        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
            });
        }

        let merged = merge_layers(layers);
        let config: BatchConfig =
            serde_json::from_value(merged.clone()).map_err(ConfigError::Deserialize)?;
        config.validate()?;

        Ok(Self {
            config,
            merged,
            sources,
        })
    }

    /// Pick the config file: an explicit path must exist, otherwise
    /// `ep-batch.toml` in the input directory is used when present.
    pub fn locate_file(
        explicit: Option<&Path>,
        input_dir: &Path,
    ) -> Result<Option<PathBuf>, ConfigError> {
        match explicit {
            Some(path) if path.is_file() => Ok(Some(path.to_path_buf())),
            Some(path) => Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }),
            None => {
                let candidate = input_dir.join(CONFIG_FILE_NAME);
                Ok(candidate.is_file().then_some(candidate))
            }
        }
    }

    /// Load and parse a TOML file into a JSON value
    fn load_toml_file(path: &Path) -> Result<Value, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get a merged value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.merged;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("engine path is not configured (use --engine or engine_path)")]
    MissingEnginePath,

    #[error("Validation error: {0}")]
    Invalid(String),

    #[error("Validation error: {0}")]
    Timeout(#[from] TimeoutValidationError),

    #[error("Validation error: {0}")]
    Markers(#[from] MarkerError),
}
