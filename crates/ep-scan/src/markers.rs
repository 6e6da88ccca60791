//! Marker substrings that identify warning, error, fatal and success lines.

use serde::{Deserialize, Serialize};

/// Errors from marker configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MarkerError {
    #[error("marker list '{0}' contains an empty marker")]
    EmptyMarker(&'static str),

    #[error("marker list 'fatal' must not be empty")]
    NoFatalMarkers,
}

/// Configurable marker substrings.
///
/// Matching is case-insensitive and runs of whitespace are collapsed on both
/// sides, so `**  Fatal  **` and `** fatal **` are the same marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSet {
    /// Lines counted as warnings.
    pub warning: Vec<String>,

    /// Lines counted as (severe) errors.
    pub error: Vec<String>,

    /// Lines that mark the run as fatally failed. Also counted as errors.
    pub fatal: Vec<String>,

    /// Lines that announce successful completion.
    pub success: Vec<String>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self {
            warning: vec!["** warning **".to_string()],
            error: vec!["** severe **".to_string()],
            fatal: vec![
                "** fatal **".to_string(),
                "**fatal".to_string(),
                "fatal error".to_string(),
                "fatal:".to_string(),
            ],
            success: vec!["energyplus completed successfully".to_string()],
        }
    }
}

impl MarkerSet {
    /// Validate the marker lists.
    pub fn validate(&self) -> Result<(), MarkerError> {
        let lists: [(&'static str, &Vec<String>); 4] = [
            ("warning", &self.warning),
            ("error", &self.error),
            ("fatal", &self.fatal),
            ("success", &self.success),
        ];
        for (name, list) in lists {
            if list.iter().any(|m| normalize(m).is_empty()) {
                return Err(MarkerError::EmptyMarker(name));
            }
        }
        if self.fatal.is_empty() {
            return Err(MarkerError::NoFatalMarkers);
        }
        Ok(())
    }

    /// Pre-normalised copy used for matching.
    pub(crate) fn normalized(&self) -> NormalizedMarkers {
        let norm = |v: &Vec<String>| v.iter().map(|m| normalize(m)).collect();
        NormalizedMarkers {
            warning: norm(&self.warning),
            error: norm(&self.error),
            fatal: norm(&self.fatal),
            success: norm(&self.success),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NormalizedMarkers {
    pub warning: Vec<String>,
    pub error: Vec<String>,
    pub fatal: Vec<String>,
    pub success: Vec<String>,
}

impl NormalizedMarkers {
    pub fn any(list: &[String], line: &str) -> bool {
        list.iter().any(|m| line.contains(m.as_str()))
    }
}

/// Lowercase and collapse whitespace runs to a single space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
