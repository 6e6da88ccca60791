//! Isolation staging
//!
//! Every dispatched job gets a fresh directory under the staging root:
//!
//! ```text
//! <staging_root>/EP_<name>_<ulid>/
//!   <model file>
//!   <weather file>
//!   Energy+.idd, DElight2.dll, ...   (engine support files, when present)
//!   Energy+.ini                      (empty)
//! ```
//!
//! The directory is created with `create_dir`, so an existing path is an
//! error rather than shared state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::job::Job;

/// Name of the empty settings file the engine expects next to the model
pub const ENGINE_INI: &str = "Energy+.ini";

/// Prefix for staging directory names
pub const STAGING_PREFIX: &str = "EP_";

/// Staging errors. Fatal for one job only.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {from} into staging directory: {source}")]
    Copy {
        from: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A prepared, private working directory for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDir {
    path: PathBuf,
    model_file: PathBuf,
    weather_file: PathBuf,
}

impl StagedDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Staged copy of the model file
    pub fn model_file(&self) -> &Path {
        &self.model_file
    }

    /// Staged copy of the weather file
    pub fn weather_file(&self) -> &Path {
        &self.weather_file
    }

    /// Remove the directory and everything in it.
    pub fn cleanup(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Prepares staging directories.
#[derive(Debug, Clone)]
pub struct Stager {
    root: PathBuf,
    support_files: Vec<PathBuf>,
}

impl Stager {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            support_files: Vec::new(),
        }
    }

    /// Extra files copied into every staging directory
    pub fn with_support_files(mut self, support_files: Vec<PathBuf>) -> Self {
        self.support_files = support_files;
        self
    }

    /// Create and populate a fresh directory for `job`.
    ///
    /// On failure the partially created directory is removed.
    pub fn stage(&self, job: &Job) -> Result<StagedDir, StagingError> {
        fs::create_dir_all(&self.root).map_err(|source| StagingError::CreateDir {
            path: self.root.clone(),
            source,
        })?;

        let path = self.root.join(format!(
            "{}{}_{}",
            STAGING_PREFIX,
            sanitize(&job.name),
            ulid::Ulid::new().to_string().to_lowercase()
        ));
        fs::create_dir(&path).map_err(|source| StagingError::CreateDir {
            path: path.clone(),
            source,
        })?;

        match populate(&path, job, &self.support_files) {
            Ok((model_file, weather_file)) => {
                tracing::debug!(job = %job.name, dir = %path.display(), "staged");
                Ok(StagedDir {
                    path,
                    model_file,
                    weather_file,
                })
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&path);
                Err(e)
            }
        }
    }
}

fn populate(
    dir: &Path,
    job: &Job,
    support_files: &[PathBuf],
) -> Result<(PathBuf, PathBuf), StagingError> {
    let model_file = copy_into(dir, &job.model_path)?;
    let weather_file = copy_into(dir, &job.weather_path)?;
    for support in support_files {
        copy_into(dir, support)?;
    }

    let ini = dir.join(ENGINE_INI);
    fs::write(&ini, b"").map_err(|source| StagingError::Write { path: ini, source })?;

    Ok((model_file, weather_file))
}

fn copy_into(dir: &Path, from: &Path) -> Result<PathBuf, StagingError> {
    let name = from.file_name().ok_or_else(|| StagingError::Copy {
        from: from.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
    })?;
    let to = dir.join(name);
    fs::copy(from, &to).map_err(|source| StagingError::Copy {
        from: from.to_path_buf(),
        source,
    })?;
    Ok(to)
}

/// Keep directory names portable.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
