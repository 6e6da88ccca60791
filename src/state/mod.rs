//! Run state and schedule state
//!
//! - JobRun states: PENDING → DISPATCHED → RUNNING → {SUCCEEDED | FAILED}
//! - ScheduleState: the pending/active/completed partition shared by the
//!   scheduler and the presentation sink

mod job_run;
mod schedule;
mod telemetry;

pub use job_run::{FailureReason, JobRun, JobState, JobStateError};
pub use schedule::{ActiveRun, Dispatched, PartitionError, ScheduleState};
pub use telemetry::{Telemetry, RECENT_LINES};

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Current UTC timestamp
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}

/// Lock a mutex, recovering the data if a holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
