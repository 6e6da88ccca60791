//! Shared fixtures for batch integration tests
//!
//! `/bin/sh` stands in for the engine: each "model" file is a shell script
//! that the engine runs from its staging directory.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use ep_batch::config::{BatchConfig, EffectiveConfig};
use serde_json::json;
use tempfile::TempDir;

pub const WEATHER_FILE: &str = "site.epw";

/// A model script that succeeds like the engine does
pub const SUCCESS_SCRIPT: &str = "echo 'Initializing Simulation'\n\
echo 'EnergyPlus Completed Successfully-- 0 Warning; 0 Severe Errors'\n\
exit 0\n";

/// An input directory with a weather file, plus a separate staging root
pub struct BatchDir {
    pub input: TempDir,
    pub staging: TempDir,
}

impl BatchDir {
    pub fn new() -> Self {
        let input = TempDir::new().expect("input dir");
        let staging = TempDir::new().expect("staging dir");
        fs::write(input.path().join(WEATHER_FILE), "LOCATION,Golden,CO,USA\n")
            .expect("weather file");
        Self { input, staging }
    }

    pub fn path(&self) -> &Path {
        self.input.path()
    }

    /// Write `<name>.idf` containing `script`.
    pub fn add_model(&self, name: &str, script: &str) -> PathBuf {
        let path = self.input.path().join(format!("{}.idf", name));
        fs::write(&path, script).expect("model file");
        path
    }

    /// Config running models with `/bin/sh`, plus `extra` overrides.
    pub fn config(&self, max_workers: usize, extra: serde_json::Value) -> BatchConfig {
        let base = json!({
            "engine_path": "/bin/sh",
            "engine_args": ["{model}"],
            "max_workers": max_workers,
            "sample_interval_ms": 20,
            "termination_grace_seconds": 2,
            "staging_root": self.staging.path().to_string_lossy(),
        });
        let overrides = ep_batch::config::deep_merge(base, extra);
        EffectiveConfig::build(None, Some(overrides))
            .expect("valid config")
            .config
    }

    /// Staging directories still on disk
    pub fn staged_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(self.staging.path())
            .expect("read staging root")
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        dirs
    }
}

/// A script that sleeps, then succeeds.
pub fn sleeping_script(seconds: f32) -> String {
    format!("sleep {}\n{}", seconds, SUCCESS_SCRIPT)
}
