//! Batch summary (batch_summary.json) and stable exit codes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{message_for, write_atomic};
use crate::scheduler::BatchOutcome;
use crate::state::{FailureReason, JobRun, JobState};

/// Schema version for batch_summary.json
pub const BATCH_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for batch_summary.json
pub const BATCH_SUMMARY_SCHEMA_ID: &str = "ep-batch/batch_summary@1";

/// Stable process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(i32)]
pub enum ExitCode {
    /// Every job succeeded
    #[default]
    Success = 0,
    /// At least one job failed
    JobsFailed = 1,
    /// Configuration or discovery error; nothing ran
    Config = 2,
    /// Batch was cancelled
    Cancelled = 80,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::JobsFailed),
            2 => Some(ExitCode::Config),
            80 => Some(ExitCode::Cancelled),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

/// Aggregated batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            BatchStatus::Success => ExitCode::Success,
            BatchStatus::Failed => ExitCode::JobsFailed,
            BatchStatus::Cancelled => ExitCode::Cancelled,
        }
    }
}

/// Per-job entry in the summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntry {
    pub seq: usize,
    pub name: String,
    pub model_path: PathBuf,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub message: String,
    pub warnings: u32,
    pub errors: u32,
    pub elapsed_ms: u64,
    pub peak_memory_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl JobEntry {
    pub fn from_run(run: &JobRun) -> Self {
        Self {
            seq: run.job.seq,
            name: run.job.name.clone(),
            model_path: run.job.model_path.clone(),
            state: run.state,
            failure: run.failure.clone(),
            exit_code: run.exit_code,
            message: message_for(run),
            warnings: run.warnings,
            errors: run.errors,
            elapsed_ms: run.elapsed.as_millis() as u64,
            peak_memory_bytes: run.peak_memory_bytes,
            dispatch_index: run.dispatch_index,
            work_dir: run.work_dir.clone(),
        }
    }
}

/// Batch summary (batch_summary.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub schema_version: u32,
    pub schema_id: String,
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: BatchStatus,
    pub exit_code: i32,
    pub job_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub max_workers: usize,
    pub peak_active: usize,
    pub duration_ms: u64,
    pub human_summary: String,
    pub jobs: Vec<JobEntry>,
}

impl BatchSummary {
    pub fn from_outcome(batch_id: String, outcome: &BatchOutcome) -> Self {
        let mut jobs: Vec<JobEntry> = outcome.runs.iter().map(JobEntry::from_run).collect();
        jobs.sort_by_key(|j| j.seq);

        let succeeded = jobs.iter().filter(|j| j.state == JobState::Succeeded).count();
        let cancelled = jobs
            .iter()
            .filter(|j| j.failure == Some(FailureReason::Cancelled))
            .count();
        let timed_out = jobs
            .iter()
            .filter(|j| matches!(j.failure, Some(FailureReason::TimedOut { .. })))
            .count();
        let failed = jobs.len() - succeeded;

        let status = if outcome.cancelled {
            BatchStatus::Cancelled
        } else if failed > 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Success
        };
        let human_summary = Self::generate_human_summary(status, jobs.len(), succeeded, failed);

        Self {
            schema_version: BATCH_SUMMARY_SCHEMA_VERSION,
            schema_id: BATCH_SUMMARY_SCHEMA_ID.to_string(),
            batch_id,
            started_at: outcome.started_at,
            ended_at: outcome.ended_at,
            status,
            exit_code: status.exit_code().as_i32(),
            job_count: jobs.len(),
            succeeded,
            failed,
            cancelled,
            timed_out,
            max_workers: outcome.max_workers,
            peak_active: outcome.peak_active,
            duration_ms: outcome.elapsed.as_millis() as u64,
            human_summary,
            jobs,
        }
    }

    fn generate_human_summary(
        status: BatchStatus,
        job_count: usize,
        succeeded: usize,
        failed: usize,
    ) -> String {
        match status {
            BatchStatus::Success => {
                if job_count == 1 {
                    "Simulation succeeded".to_string()
                } else {
                    format!("Batch succeeded: {}/{} simulations passed", succeeded, job_count)
                }
            }
            BatchStatus::Failed => format!(
                "Batch failed: {} succeeded, {} failed of {}",
                succeeded, failed, job_count
            ),
            BatchStatus::Cancelled => format!(
                "Batch cancelled: {} succeeded, {} did not finish",
                succeeded, failed
            ),
        }
    }

    pub fn exit_code_enum(&self) -> Option<ExitCode> {
        ExitCode::from_i32(self.exit_code)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        write_atomic(path, json.as_bytes())
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::state::now_utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn run(seq: usize) -> JobRun {
        JobRun::new(Job::new(
            seq,
            PathBuf::from(format!("/in/job{}.idf", seq)),
            PathBuf::from("/in/site.epw"),
        ))
    }

    fn succeeded(seq: usize) -> JobRun {
        let mut r = run(seq);
        r.dispatch(seq).unwrap();
        r.start(1).unwrap();
        r.succeed().unwrap();
        r
    }

    fn outcome(runs: Vec<JobRun>, cancelled: bool) -> BatchOutcome {
        BatchOutcome {
            runs,
            started_at: now_utc(),
            ended_at: now_utc(),
            elapsed: Duration::from_millis(1500),
            peak_active: 2,
            max_workers: 2,
            cancelled,
        }
    }

    #[test]
    fn test_all_succeeded() {
        let summary = BatchSummary::from_outcome(
            "b1".to_string(),
            &outcome(vec![succeeded(1), succeeded(0)], false),
        );
        assert_eq!(summary.status, BatchStatus::Success);
        assert_eq!(summary.exit_code, 0);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.jobs[0].seq, 0);
        assert_eq!(summary.duration_ms, 1500);
        assert_eq!(summary.human_summary, "Batch succeeded: 2/2 simulations passed");
    }

    #[test]
    fn test_some_failed() {
        let mut failed = run(1);
        failed.dispatch(1).unwrap();
        failed.start(1).unwrap();
        failed
            .fail(FailureReason::TimedOut { seconds: 5 })
            .unwrap();
        let summary =
            BatchSummary::from_outcome("b2".to_string(), &outcome(vec![succeeded(0), failed], false));
        assert_eq!(summary.status, BatchStatus::Failed);
        assert_eq!(summary.exit_code_enum(), Some(ExitCode::JobsFailed));
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.jobs[1].message, "Timed out after 5s");
    }

    #[test]
    fn test_cancelled() {
        let mut pending = run(0);
        pending.fail(FailureReason::Cancelled).unwrap();
        let summary =
            BatchSummary::from_outcome("b3".to_string(), &outcome(vec![pending], true));
        assert_eq!(summary.status, BatchStatus::Cancelled);
        assert_eq!(summary.exit_code, 80);
        assert_eq!(summary.cancelled, 1);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch_summary.json");
        let summary =
            BatchSummary::from_outcome("b4".to_string(), &outcome(vec![succeeded(0)], false));
        summary.write_to_file(&path).unwrap();

        let loaded = BatchSummary::from_file(&path).unwrap();
        assert_eq!(loaded.batch_id, "b4");
        assert_eq!(loaded.schema_id, BATCH_SUMMARY_SCHEMA_ID);
        assert_eq!(loaded.human_summary, "Simulation succeeded");

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["jobs"][0]["state"], "SUCCEEDED");
        assert!(json["jobs"][0].get("failure").is_none());
    }

    #[test]
    fn test_exit_code_round_trip_values() {
        assert_eq!(ExitCode::Cancelled.as_i32(), 80);
        assert_eq!(ExitCode::from_i32(2), Some(ExitCode::Config));
        assert_eq!(ExitCode::from_i32(7), None);
        assert!(ExitCode::default().is_success());
    }
}
