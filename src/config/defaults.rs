//! Built-in defaults (layer 1)
//!
//! Hardcoded defaults for every key that has one. `engine_path` and
//! `max_workers` have no built-in value: the engine must be configured and
//! the worker ceiling is derived from the host when unset.

use ep_scan::MarkerSet;
use serde::{Deserialize, Serialize};

use crate::registry::{DEFAULT_MODEL_GLOB, DEFAULT_WEATHER_GLOB};
use crate::runner::DEFAULT_ENGINE_ARGS;

/// Default report file name, placed next to the models
pub const DEFAULT_CSV_NAME: &str = "simulation_results.csv";

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Sampling and cancellation-check interval (default: 1000 ms)
    pub sample_interval_ms: u64,

    /// Grace period between SIGTERM and SIGKILL (default: 10)
    pub termination_grace_seconds: u64,

    /// Keep staging directories after each run (default: false)
    pub keep_staging: bool,

    /// Stop a run when a fatal marker is printed (default: true)
    pub terminate_on_fatal: bool,

    /// Engine argument template
    pub engine_args: Vec<String>,

    pub model_glob: String,
    pub weather_glob: String,
    pub recursive: bool,

    /// Report file (default: "simulation_results.csv")
    pub csv_path: String,

    pub markers: MarkerSet,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            termination_grace_seconds: 10,
            keep_staging: false,
            terminate_on_fatal: true,
            engine_args: DEFAULT_ENGINE_ARGS.iter().map(|a| a.to_string()).collect(),
            model_glob: DEFAULT_MODEL_GLOB.to_string(),
            weather_glob: DEFAULT_WEATHER_GLOB.to_string(),
            recursive: false,
            csv_path: DEFAULT_CSV_NAME.to_string(),
            markers: MarkerSet::default(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "sample_interval_ms": self.sample_interval_ms,
            "termination_grace_seconds": self.termination_grace_seconds,
            "keep_staging": self.keep_staging,
            "terminate_on_fatal": self.terminate_on_fatal,
            "engine_args": self.engine_args,
            "discovery": {
                "model_glob": self.model_glob,
                "weather_glob": self.weather_glob,
                "recursive": self.recursive
            },
            "report": {
                "csv_path": self.csv_path
            },
            "markers": {
                "warning": self.markers.warning,
                "error": self.markers.error,
                "fatal": self.markers.fatal,
                "success": self.markers.success
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.sample_interval_ms, 1000);
        assert_eq!(defaults.termination_grace_seconds, 10);
        assert!(!defaults.keep_staging);
        assert!(defaults.terminate_on_fatal);
        assert_eq!(defaults.model_glob, "*.idf");
        assert_eq!(defaults.csv_path, "simulation_results.csv");
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::default().to_value();

        assert_eq!(value["sample_interval_ms"], 1000);
        assert_eq!(value["discovery"]["weather_glob"], "*.epw");
        assert_eq!(value["engine_args"][0], "-w");
        assert!(value.get("engine_path").is_none());
        assert!(value["markers"]["fatal"].as_array().unwrap().len() >= 1);
    }
}
