//! Job descriptors
//!
//! A [`Job`] is one simulation to run: a model file paired with the batch's
//! weather file. Jobs are created by the registry and never change afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One unit of simulation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Position in discovery order (0-based)
    pub seq: usize,

    /// Job name: the model file stem, unique within a batch
    pub name: String,

    /// Absolute path of the model input file
    pub model_path: PathBuf,

    /// Absolute path of the weather file
    pub weather_path: PathBuf,
}

impl Job {
    /// Create a job, deriving its name from the model file stem.
    pub fn new(seq: usize, model_path: PathBuf, weather_path: PathBuf) -> Self {
        let name = job_name(&model_path);
        Self {
            seq,
            name,
            model_path,
            weather_path,
        }
    }

    /// Model file name (e.g. `office.idf`)
    pub fn model_file_name(&self) -> String {
        file_name(&self.model_path)
    }

    /// Weather file name (e.g. `USA_CO_Golden.epw`)
    pub fn weather_file_name(&self) -> String {
        file_name(&self.weather_path)
    }
}

/// Derive a job name from a model path (file stem, lossy UTF-8).
pub fn job_name(model_path: &Path) -> String {
    model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Generate a batch identifier (lowercase ULID)
pub fn generate_batch_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}
