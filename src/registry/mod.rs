//! Job discovery
//!
//! Scans an input directory for model files and pairs each one with the
//! batch's single weather file. The returned jobs are sorted by model file
//! name; that order is the discovery order used for the pending queue and
//! the report.
//!
//! The weather file is never guessed: zero or several candidates without an
//! explicit `weather_file` is an error.

use globset::{GlobBuilder, GlobMatcher};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::job::Job;

/// Default model file pattern
pub const DEFAULT_MODEL_GLOB: &str = "*.idf";

/// Default weather file pattern
pub const DEFAULT_WEATHER_GLOB: &str = "*.epw";

/// Errors for job discovery
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("input directory not found: {path}")]
    InputDirNotFound { path: PathBuf },

    #[error("no model files matching '{pattern}' in {dir}")]
    NoJobsFound { dir: PathBuf, pattern: String },

    #[error("expected exactly one weather file in {dir}, found {count}{}", format_candidates(.candidates))]
    AmbiguousWeatherFile {
        dir: PathBuf,
        count: usize,
        candidates: Vec<String>,
    },

    #[error("weather file not found: {path}")]
    WeatherFileNotFound { path: PathBuf },

    #[error("duplicate job name '{name}': {first} and {second}")]
    DuplicateJobName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("invalid glob pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        String::new()
    } else {
        format!(" ({})", candidates.join(", "))
    }
}

/// How to find jobs in the input directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Model file pattern, matched case-insensitively against file names
    pub model_glob: String,
    /// Weather file pattern, matched case-insensitively against file names
    pub weather_glob: String,
    /// Descend into subdirectories when looking for model files
    pub recursive: bool,
    /// Explicit weather file; skips the weather scan
    pub weather_file: Option<PathBuf>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            model_glob: DEFAULT_MODEL_GLOB.to_string(),
            weather_glob: DEFAULT_WEATHER_GLOB.to_string(),
            recursive: false,
            weather_file: None,
        }
    }
}

/// Discover jobs in `dir`.
///
/// Reads directory entries only; nothing is created or modified.
pub fn discover(dir: &Path, options: &DiscoveryOptions) -> Result<Vec<Job>, RegistryError> {
    if !dir.is_dir() {
        return Err(RegistryError::InputDirNotFound {
            path: dir.to_path_buf(),
        });
    }
    let dir = dir.canonicalize()?;

    let model_matcher = matcher(&options.model_glob)?;
    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let mut models = matching_files(&dir, &model_matcher, max_depth)?;
    if models.is_empty() {
        return Err(RegistryError::NoJobsFound {
            dir,
            pattern: options.model_glob.clone(),
        });
    }
    models.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));

    let weather = match &options.weather_file {
        Some(path) => resolve_weather(&dir, path)?,
        None => find_weather(&dir, &options.weather_glob)?,
    };

    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut jobs = Vec::with_capacity(models.len());
    for (seq, model) in models.into_iter().enumerate() {
        let job = Job::new(seq, model, weather.clone());
        if let Some(first) = seen.insert(job.name.clone(), job.model_path.clone()) {
            return Err(RegistryError::DuplicateJobName {
                name: job.name,
                first,
                second: job.model_path,
            });
        }
        jobs.push(job);
    }

    tracing::debug!(dir = %dir.display(), jobs = jobs.len(), weather = %weather.display(), "discovered jobs");
    Ok(jobs)
}

fn matcher(pattern: &str) -> Result<GlobMatcher, RegistryError> {
    Ok(GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

fn matching_files(
    dir: &Path,
    matcher: &GlobMatcher,
    max_depth: usize,
) -> Result<Vec<PathBuf>, RegistryError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if matcher.is_match(Path::new(entry.file_name())) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// The weather file always lives at the top of the input directory.
fn find_weather(dir: &Path, pattern: &str) -> Result<PathBuf, RegistryError> {
    let mut candidates = matching_files(dir, &matcher(pattern)?, 1)?;
    if candidates.len() == 1 {
        return Ok(candidates.remove(0));
    }
    Err(RegistryError::AmbiguousWeatherFile {
        dir: dir.to_path_buf(),
        count: candidates.len(),
        candidates: candidates
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect(),
    })
}

/// Relative weather paths are tried as given, then inside the input dir.
fn resolve_weather(dir: &Path, path: &Path) -> Result<PathBuf, RegistryError> {
    let candidates = if path.is_absolute() {
        vec![path.to_path_buf()]
    } else {
        vec![path.to_path_buf(), dir.join(path)]
    };
    candidates
        .into_iter()
        .find(|p| p.is_file())
        .map(|p| fs::canonicalize(&p))
        .transpose()?
        .ok_or_else(|| RegistryError::WeatherFileNotFound {
            path: path.to_path_buf(),
        })
}
