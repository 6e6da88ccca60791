//! Report rows: read-only projections of completed runs

use serde::Serialize;
use std::time::Duration;

use crate::state::{FailureReason, JobRun, JobState};

/// Message for a successful run
pub const SUCCESS_MESSAGE: &str = "EnergyPlus Completed Successfully";

/// Elapsed wall time split for the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ElapsedParts {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl From<Duration> for ElapsedParts {
    fn from(elapsed: Duration) -> Self {
        let total = elapsed.as_secs();
        Self {
            hours: total / 3600,
            minutes: (total % 3600) / 60,
            seconds: total % 60,
        }
    }
}

/// One line of the batch report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    /// 1-based discovery position
    pub seq: usize,
    pub job_id: String,
    pub weather_file: String,
    pub model_file: String,
    pub success: bool,
    pub message: String,
    pub warnings: u32,
    pub errors: u32,
    pub elapsed: ElapsedParts,
}

impl ReportRow {
    pub fn from_run(run: &JobRun) -> Self {
        Self {
            seq: run.job.seq + 1,
            job_id: run.job.name.clone(),
            weather_file: run.job.weather_file_name(),
            model_file: run.job.model_file_name(),
            success: run.succeeded(),
            message: message_for(run),
            warnings: run.warnings,
            errors: run.errors,
            elapsed: ElapsedParts::from(run.elapsed),
        }
    }
}

/// Report message for a terminal run. Never empty.
pub fn message_for(run: &JobRun) -> String {
    match (run.state, &run.failure) {
        (JobState::Succeeded, _) => SUCCESS_MESSAGE.to_string(),
        (JobState::Failed, Some(reason)) => match reason {
            FailureReason::FatalError | FailureReason::EngineRuntimeFailure { .. } => run
                .first_error
                .clone()
                .filter(|line| !line.is_empty())
                .unwrap_or_else(|| reason.to_string()),
            other => other.to_string(),
        },
        (JobState::Failed, None) => "Failed".to_string(),
        (state, _) => format!("Incomplete ({})", state),
    }
}

/// One row per run, ordered by discovery sequence.
pub fn aggregate(runs: &[JobRun]) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = runs.iter().map(ReportRow::from_run).collect();
    rows.sort_by_key(|row| row.seq);
    rows
}
