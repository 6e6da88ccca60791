//! Marker-based scanning of EnergyPlus output.
//!
//! The scheduler treats every engine run as an opaque process. This crate is
//! the one place that knows what the engine's text output looks like: which
//! lines are warnings, severe errors or fatal errors, how far along a run is,
//! and what the final completion line reports.

mod markers;
mod progress;

pub use markers::{normalize, MarkerError, MarkerSet};
pub use progress::estimate_progress;

use std::sync::OnceLock;

use markers::NormalizedMarkers;
use regex_lite::Regex;

/// Classification of a single output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Fatal,
    Error,
    Warning,
    Success,
    Other,
}

/// Counts and notable lines gathered from engine output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Warning lines seen
    pub warning_lines: u32,
    /// Error lines seen (fatal lines included)
    pub error_lines: u32,
    /// A fatal marker was seen
    pub fatal: bool,
    /// The success marker was seen
    pub completed: bool,
    /// First error or fatal line, trimmed
    pub first_error: Option<String>,
    /// Counts printed by the engine's own completion line, if any
    pub reported: Option<ReportedCounts>,
}

/// `N Warning; M Severe Errors` as printed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportedCounts {
    pub warnings: u32,
    pub severe_errors: u32,
}

impl ScanSummary {
    /// Warning count, preferring the engine's own tally.
    pub fn warnings(&self) -> u32 {
        self.reported.map(|r| r.warnings).unwrap_or(self.warning_lines)
    }

    /// Error count, preferring the engine's own tally.
    ///
    /// The engine does not count the fatal line itself as a severe error.
    pub fn errors(&self) -> u32 {
        match self.reported {
            Some(r) => r.severe_errors + u32::from(self.fatal),
            None => self.error_lines,
        }
    }

    /// Fold another summary (e.g. from the `.err` file) into this one.
    pub fn merge(&mut self, other: ScanSummary) {
        self.warning_lines += other.warning_lines;
        self.error_lines += other.error_lines;
        self.fatal |= other.fatal;
        self.completed |= other.completed;
        if self.first_error.is_none() {
            self.first_error = other.first_error;
        }
        if other.reported.is_some() {
            self.reported = other.reported;
        }
    }
}

/// Pluggable text-scan strategy over engine output.
pub trait OutputScanner: Send + Sync {
    /// Classify one line.
    fn classify_line(&self, line: &str) -> LineKind;

    /// Extract the engine's own warning/error tally from a line, if present.
    fn reported_counts(&self, _line: &str) -> Option<ReportedCounts> {
        None
    }

    /// Update `summary` with one line.
    fn observe(&self, summary: &mut ScanSummary, line: &str) {
        match self.classify_line(line) {
            LineKind::Fatal => {
                summary.fatal = true;
                summary.error_lines += 1;
                summary.first_error.get_or_insert_with(|| line.trim().to_string());
            }
            LineKind::Error => {
                summary.error_lines += 1;
                summary.first_error.get_or_insert_with(|| line.trim().to_string());
            }
            LineKind::Warning => summary.warning_lines += 1,
            LineKind::Success => summary.completed = true,
            LineKind::Other => {}
        }
        if let Some(counts) = self.reported_counts(line) {
            summary.reported = Some(counts);
        }
    }

    /// Scan a full set of lines.
    fn scan(&self, lines: &[String]) -> ScanSummary {
        let mut summary = ScanSummary::default();
        for line in lines {
            self.observe(&mut summary, line);
        }
        summary
    }
}

fn reported_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+) warning; (\d+) severe errors?").expect("valid regex")
    })
}

/// Scanner driven by a [`MarkerSet`].
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    markers: NormalizedMarkers,
}

impl MarkerScanner {
    pub fn new(markers: &MarkerSet) -> Self {
        Self {
            markers: markers.normalized(),
        }
    }
}

impl Default for MarkerScanner {
    fn default() -> Self {
        Self::new(&MarkerSet::default())
    }
}

impl OutputScanner for MarkerScanner {
    fn classify_line(&self, line: &str) -> LineKind {
        let line = normalize(line);
        let m = &self.markers;
        if NormalizedMarkers::any(&m.fatal, &line) {
            LineKind::Fatal
        } else if NormalizedMarkers::any(&m.error, &line) {
            LineKind::Error
        } else if NormalizedMarkers::any(&m.warning, &line) {
            LineKind::Warning
        } else if NormalizedMarkers::any(&m.success, &line) {
            LineKind::Success
        } else {
            LineKind::Other
        }
    }

    fn reported_counts(&self, line: &str) -> Option<ReportedCounts> {
        let line = normalize(line);
        let caps = reported_re().captures(&line)?;
        Some(ReportedCounts {
            warnings: caps.get(1)?.as_str().parse().ok()?,
            severe_errors: caps.get(2)?.as_str().parse().ok()?,
        })
    }
}
