//! JobRun state machine
//!
//! States: PENDING → DISPATCHED → RUNNING → {SUCCEEDED | FAILED}
//! with PENDING → FAILED (cancelled before dispatch) and
//! DISPATCHED → FAILED (staging or launch failure).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::{now_utc, TerminalState, Telemetry};
use crate::job::Job;

/// JobRun state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Waiting in the queue
    Pending,
    /// Holding a worker slot, being staged and launched
    Dispatched,
    /// Engine process is running
    Running,
    /// Engine exited cleanly
    Succeeded,
    /// Failed, cancelled or timed out
    Failed,
}

impl TerminalState for JobState {
    fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl JobState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: JobState) -> bool {
        matches!(
            (self, target),
            (JobState::Pending, JobState::Dispatched)
                | (JobState::Pending, JobState::Failed)
                | (JobState::Dispatched, JobState::Running)
                | (JobState::Dispatched, JobState::Failed)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "Pending",
            JobState::Dispatched => "Dispatched",
            JobState::Running => "Running",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Why a JobRun ended in FAILED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// Working directory could not be prepared
    StagingFailed { message: String },
    /// Engine process could not be started
    LaunchFailed { message: String },
    /// Engine exited non-zero or was killed
    EngineRuntimeFailure {
        exit_code: Option<i32>,
        signal: Option<String>,
    },
    /// A fatal-error marker was seen in the output
    FatalError,
    /// Global cancellation
    Cancelled,
    /// Per-job timeout exceeded
    TimedOut { seconds: u64 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StagingFailed { message } => write!(f, "Staging failed: {}", message),
            FailureReason::LaunchFailed { message } => write!(f, "Launch failed: {}", message),
            FailureReason::EngineRuntimeFailure {
                exit_code: Some(code),
                ..
            } => write!(f, "Exit code {}", code),
            FailureReason::EngineRuntimeFailure {
                signal: Some(sig), ..
            } => write!(f, "Killed by {}", sig),
            FailureReason::EngineRuntimeFailure { .. } => f.write_str("Engine failed"),
            FailureReason::FatalError => f.write_str("Fatal error"),
            FailureReason::Cancelled => f.write_str("Cancelled"),
            FailureReason::TimedOut { seconds } => write!(f, "Timed out after {}s", seconds),
        }
    }
}

/// Errors for JobRun state operations
#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("Invalid state transition from {from:?} to {to:?} for job {job}")]
    InvalidTransition {
        job: String,
        from: JobState,
        to: JobState,
    },
}

/// Mutable execution record for one [`Job`].
#[derive(Debug, Clone)]
pub struct JobRun {
    /// The job being run
    pub job: Job,

    /// Current state
    pub state: JobState,

    /// Order in which the scheduler dispatched this run (0-based)
    pub dispatch_index: Option<usize>,

    /// When the run was dispatched
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,

    /// Wall-clock time from dispatch to terminal state
    pub elapsed: Duration,

    /// Engine process id while running
    pub pid: Option<u32>,

    /// Staged working directory
    pub work_dir: Option<PathBuf>,

    /// Engine exit code
    pub exit_code: Option<i32>,

    /// Last sampled CPU percentage (process tree)
    pub cpu_percent: f32,

    /// Last sampled resident memory in bytes (process tree)
    pub memory_bytes: u64,

    /// Highest sampled resident memory in bytes
    pub peak_memory_bytes: u64,

    /// Estimated progress percentage
    pub progress: u8,

    /// Captured stdout/stderr lines
    pub output: Vec<String>,

    /// Warning count from output scan
    pub warnings: u32,

    /// Error count from output scan
    pub errors: u32,

    /// First error line found in the output
    pub first_error: Option<String>,

    /// Failure reason when state is FAILED
    pub failure: Option<FailureReason>,

    clock: Option<Instant>,
}

impl JobRun {
    /// Create a new run in PENDING state
    pub fn new(job: Job) -> Self {
        Self {
            job,
            state: JobState::Pending,
            dispatch_index: None,
            started_at: None,
            ended_at: None,
            elapsed: Duration::ZERO,
            pid: None,
            work_dir: None,
            exit_code: None,
            cpu_percent: 0.0,
            memory_bytes: 0,
            peak_memory_bytes: 0,
            progress: 0,
            output: Vec::new(),
            warnings: 0,
            errors: 0,
            first_error: None,
            failure: None,
            clock: None,
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: JobState) -> Result<(), JobStateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(JobStateError::InvalidTransition {
                job: self.job.name.clone(),
                from: self.state,
                to: new_state,
            });
        }
        self.state = new_state;
        Ok(())
    }

    /// PENDING → DISPATCHED; starts the wall clock
    pub fn dispatch(&mut self, index: usize) -> Result<(), JobStateError> {
        self.transition(JobState::Dispatched)?;
        self.dispatch_index = Some(index);
        self.started_at = Some(now_utc());
        self.clock = Some(Instant::now());
        Ok(())
    }

    /// DISPATCHED → RUNNING
    pub fn start(&mut self, pid: u32) -> Result<(), JobStateError> {
        self.transition(JobState::Running)?;
        self.pid = Some(pid);
        Ok(())
    }

    /// RUNNING → SUCCEEDED
    pub fn succeed(&mut self) -> Result<(), JobStateError> {
        self.transition(JobState::Succeeded)?;
        self.finish_clock();
        Ok(())
    }

    /// Any non-terminal state → FAILED
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), JobStateError> {
        self.transition(JobState::Failed)?;
        self.failure = Some(reason);
        self.finish_clock();
        Ok(())
    }

    /// Copy the last telemetry values onto the record
    pub fn absorb_telemetry(&mut self, telemetry: &Telemetry) {
        self.cpu_percent = telemetry.cpu_percent;
        self.memory_bytes = telemetry.memory_bytes;
        self.peak_memory_bytes = telemetry.peak_memory_bytes;
        self.progress = telemetry.progress;
    }

    /// Check if run is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// True if the run ended in SUCCEEDED
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Succeeded
    }

    /// Time since dispatch, or the final elapsed time once terminal
    pub fn running_for(&self) -> Duration {
        match (self.is_terminal(), self.clock) {
            (false, Some(clock)) => clock.elapsed(),
            _ => self.elapsed,
        }
    }

    fn finish_clock(&mut self) {
        self.ended_at = Some(now_utc());
        self.pid = None;
        if let Some(clock) = self.clock {
            self.elapsed = clock.elapsed();
        }
    }

    #[cfg(test)]
    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }
}
