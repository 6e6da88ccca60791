//! Live per-run telemetry
//!
//! Written by the run's own sampler and output observer; read by snapshots.

use std::collections::VecDeque;

use ep_scan::{estimate_progress, LineKind};

use crate::sampler::ResourceSample;

/// Number of recent output lines kept for display
pub const RECENT_LINES: usize = 10;

/// Mutable runtime view of one active run.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    /// Last sampled CPU percentage
    pub cpu_percent: f32,
    /// Last sampled resident memory in bytes
    pub memory_bytes: u64,
    /// Highest sampled resident memory in bytes
    pub peak_memory_bytes: u64,
    /// Successful samples taken
    pub samples: u64,
    /// Estimated progress percentage
    pub progress: u8,
    /// Warning lines seen so far
    pub warnings: u32,
    /// Error lines seen so far
    pub errors: u32,
    /// Most recent output lines
    pub recent: VecDeque<String>,
}

impl Telemetry {
    pub fn record_sample(&mut self, sample: ResourceSample) {
        self.cpu_percent = sample.cpu_percent;
        self.memory_bytes = sample.memory_bytes;
        self.peak_memory_bytes = self.peak_memory_bytes.max(sample.memory_bytes);
        self.samples += 1;
    }

    pub fn record_line(&mut self, line: &str, kind: LineKind) {
        match kind {
            LineKind::Fatal | LineKind::Error => self.errors += 1,
            LineKind::Warning => self.warnings += 1,
            LineKind::Success | LineKind::Other => {}
        }
        if let Some(progress) = estimate_progress(line, self.progress) {
            self.progress = progress;
        }
        if self.recent.len() == RECENT_LINES {
            self.recent.pop_front();
        }
        self.recent.push_back(line.trim().to_string());
    }
}
