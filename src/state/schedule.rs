//! Schedule state: the pending → active → completed partition
//!
//! This is the only state shared between the scheduler thread and the
//! watcher threads. It lives behind a single mutex; every change of queue
//! membership happens inside one method call so an observer holding the lock
//! always sees every job exactly once.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::{lock, FailureReason, JobRun, JobState, JobStateError, Telemetry};
use crate::job::Job;
use crate::monitor::{ActiveRunView, ScheduleSnapshot};
use crate::runner::ProcessHandle;

/// An entry in the active set.
#[derive(Debug)]
pub struct ActiveRun {
    pub run: JobRun,
    pub handle: Option<Arc<ProcessHandle>>,
    pub telemetry: Arc<Mutex<Telemetry>>,
}

/// What the scheduler gets back when it takes a job off the queue.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub job: Job,
    pub telemetry: Arc<Mutex<Telemetry>>,
}

/// Partition invariant violations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("expected {expected} jobs across pending/active/completed, found {found}")]
    CountMismatch { expected: usize, found: usize },

    #[error("job {0} appears more than once")]
    Duplicate(usize),

    #[error("{active} active runs exceed the ceiling of {max_workers}")]
    CeilingExceeded { active: usize, max_workers: usize },
}

/// Pending queue, active set and completed set for one batch.
#[derive(Debug)]
pub struct ScheduleState {
    max_workers: usize,
    total: usize,
    pending: VecDeque<JobRun>,
    active: BTreeMap<usize, ActiveRun>,
    completed: Vec<JobRun>,
    next_dispatch: usize,
    peak_active: usize,
    cancelling: bool,
}

impl ScheduleState {
    /// Queue all jobs in discovery order.
    pub fn new(jobs: Vec<Job>, max_workers: usize) -> Self {
        let total = jobs.len();
        Self {
            max_workers: max_workers.max(1),
            total,
            pending: jobs.into_iter().map(JobRun::new).collect(),
            active: BTreeMap::new(),
            completed: Vec::with_capacity(total),
            next_dispatch: 0,
            peak_active: 0,
            cancelling: false,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Highest active count observed so far
    pub fn peak_active(&self) -> usize {
        self.peak_active
    }

    pub fn is_cancelling(&self) -> bool {
        self.cancelling
    }

    /// A slot is free and a job is waiting.
    pub fn can_dispatch(&self) -> bool {
        !self.cancelling && self.active.len() < self.max_workers && !self.pending.is_empty()
    }

    /// Nothing pending and nothing active.
    pub fn is_quiescent(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    /// Pop the head of the queue into the active set as DISPATCHED.
    pub fn dispatch_next(&mut self) -> Result<Option<Dispatched>, JobStateError> {
        if !self.can_dispatch() {
            return Ok(None);
        }
        let Some(mut run) = self.pending.pop_front() else {
            return Ok(None);
        };
        if let Err(e) = run.dispatch(self.next_dispatch) {
            self.pending.push_front(run);
            return Err(e);
        }
        self.next_dispatch += 1;

        let telemetry = Arc::new(Mutex::new(Telemetry::default()));
        let dispatched = Dispatched {
            job: run.job.clone(),
            telemetry: Arc::clone(&telemetry),
        };
        self.active.insert(
            run.job.seq,
            ActiveRun {
                run,
                handle: None,
                telemetry,
            },
        );
        self.peak_active = self.peak_active.max(self.active.len());
        Ok(Some(dispatched))
    }

    /// Record the staged working directory of an active run.
    pub fn set_work_dir(&mut self, seq: usize, work_dir: PathBuf) {
        if let Some(entry) = self.active.get_mut(&seq) {
            entry.run.work_dir = Some(work_dir);
        }
    }

    /// DISPATCHED → RUNNING with the launched process.
    pub fn mark_running(
        &mut self,
        seq: usize,
        handle: Arc<ProcessHandle>,
    ) -> Result<(), JobStateError> {
        if let Some(entry) = self.active.get_mut(&seq) {
            entry.run.start(handle.pid())?;
            entry.handle = Some(handle);
        }
        Ok(())
    }

    /// Move an active run to the completed set.
    ///
    /// `apply` performs the terminal transition. The run is moved even if
    /// `apply` fails, so the partition always holds. Returns the final state.
    pub fn finish<F>(&mut self, seq: usize, apply: F) -> Option<Result<JobState, JobStateError>>
    where
        F: FnOnce(&mut JobRun, &Telemetry) -> Result<(), JobStateError>,
    {
        let ActiveRun {
            mut run, telemetry, ..
        } = self.active.remove(&seq)?;
        let result = {
            let telemetry = lock(&telemetry);
            run.absorb_telemetry(&telemetry);
            apply(&mut run, &telemetry)
        };
        let state = run.state;
        self.completed.push(run);
        Some(result.map(|()| state))
    }

    /// Most recently completed run
    pub fn last_completed(&self) -> Option<&JobRun> {
        self.completed.last()
    }

    /// Stop dispatching and fail every pending run as CANCELLED.
    ///
    /// Returns the handles of running processes so the caller can terminate
    /// them outside the lock.
    pub fn begin_cancel(&mut self) -> Vec<Arc<ProcessHandle>> {
        self.cancelling = true;
        while let Some(mut run) = self.pending.pop_front() {
            if let Err(e) = run.fail(FailureReason::Cancelled) {
                tracing::warn!(job = %run.job.name, error = %e, "cancel transition rejected");
            }
            self.completed.push(run);
        }
        self.active_handles()
    }

    /// Handles of all running processes.
    pub fn active_handles(&self) -> Vec<Arc<ProcessHandle>> {
        self.active
            .values()
            .filter_map(|entry| entry.handle.as_ref().map(Arc::clone))
            .collect()
    }

    /// Verify that pending, active and completed partition the batch.
    pub fn check_partition(&self) -> Result<(), PartitionError> {
        if self.active.len() > self.max_workers {
            return Err(PartitionError::CeilingExceeded {
                active: self.active.len(),
                max_workers: self.max_workers,
            });
        }
        let found = self.pending.len() + self.active.len() + self.completed.len();
        if found != self.total {
            return Err(PartitionError::CountMismatch {
                expected: self.total,
                found,
            });
        }
        let mut seen = BTreeSet::new();
        let seqs = self
            .pending
            .iter()
            .map(|r| r.job.seq)
            .chain(self.active.keys().copied())
            .chain(self.completed.iter().map(|r| r.job.seq));
        for seq in seqs {
            if !seen.insert(seq) {
                return Err(PartitionError::Duplicate(seq));
            }
        }
        Ok(())
    }

    /// Immutable view for the presentation sink.
    pub fn snapshot(&self) -> ScheduleSnapshot {
        let runs = self
            .active
            .values()
            .map(|entry| {
                let telemetry = lock(&entry.telemetry);
                ActiveRunView {
                    name: entry.run.job.name.clone(),
                    state: entry.run.state,
                    pid: entry.run.pid,
                    cpu_percent: telemetry.cpu_percent,
                    memory_bytes: telemetry.memory_bytes,
                    progress: telemetry.progress,
                    warnings: telemetry.warnings,
                    errors: telemetry.errors,
                    elapsed: entry.run.running_for(),
                    last_line: telemetry.recent.back().cloned(),
                }
            })
            .collect();

        let succeeded = self.completed.iter().filter(|r| r.succeeded()).count();
        ScheduleSnapshot {
            total: self.total,
            max_workers: self.max_workers,
            pending: self.pending.len(),
            active: self.active.len(),
            completed: self.completed.len(),
            succeeded,
            failed: self.completed.len() - succeeded,
            cancelling: self.cancelling,
            runs,
        }
    }

    /// Terminal runs in completion order
    pub fn completed(&self) -> &[JobRun] {
        &self.completed
    }

    /// States of all runs by discovery sequence (pending included).
    pub fn states(&self) -> BTreeMap<usize, JobState> {
        self.pending
            .iter()
            .map(|r| (r.job.seq, r.state))
            .chain(self.active.iter().map(|(seq, e)| (*seq, e.run.state)))
            .chain(self.completed.iter().map(|r| (r.job.seq, r.state)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs(n: usize) -> Vec<Job> {
        (0..n)
            .map(|i| {
                Job::new(
                    i,
                    PathBuf::from(format!("/m/job{}.idf", i)),
                    PathBuf::from("/m/w.epw"),
                )
            })
            .collect()
    }

    #[test]
    fn test_new_state_all_pending() {
        let state = ScheduleState::new(jobs(3), 2);
        assert_eq!(state.pending_len(), 3);
        assert_eq!(state.active_len(), 0);
        assert!(state.check_partition().is_ok());
        assert!(!state.is_quiescent());
    }

    #[test]
    fn test_zero_workers_clamped_to_one() {
        let state = ScheduleState::new(jobs(1), 0);
        assert_eq!(state.max_workers(), 1);
    }

    #[test]
    fn test_dispatch_respects_ceiling_and_fifo() {
        let mut state = ScheduleState::new(jobs(5), 2);
        let a = state.dispatch_next().unwrap().unwrap();
        let b = state.dispatch_next().unwrap().unwrap();
        assert!(state.dispatch_next().unwrap().is_none());
        assert_eq!(a.job.seq, 0);
        assert_eq!(b.job.seq, 1);
        assert_eq!(state.active_len(), 2);
        assert_eq!(state.peak_active(), 2);
        assert!(state.check_partition().is_ok());
    }

    #[test]
    fn test_finish_frees_slot() {
        let mut state = ScheduleState::new(jobs(3), 1);
        state.dispatch_next().unwrap().unwrap();
        let finished = state
            .finish(0, |run, _| {
                run.fail(FailureReason::LaunchFailed {
                    message: "boom".to_string(),
                })
            })
            .unwrap()
            .unwrap();
        assert_eq!(finished, JobState::Failed);
        assert_eq!(state.last_completed().unwrap().job.seq, 0);
        assert!(state.check_partition().is_ok());
        let next = state.dispatch_next().unwrap().unwrap();
        assert_eq!(next.job.seq, 1);
    }

    #[test]
    fn test_finish_moves_run_even_on_bad_transition() {
        let mut state = ScheduleState::new(jobs(1), 1);
        state.dispatch_next().unwrap().unwrap();
        // DISPATCHED → SUCCEEDED is not a valid transition
        let result = state.finish(0, |run, _| run.succeed()).unwrap();
        assert!(result.is_err());
        assert_eq!(state.completed_len(), 1);
        assert!(state.check_partition().is_ok());
    }

    #[test]
    fn test_finish_unknown_seq() {
        let mut state = ScheduleState::new(jobs(1), 1);
        assert!(state.finish(7, |_, _| Ok(())).is_none());
    }

    #[test]
    fn test_begin_cancel_fails_pending() {
        let mut state = ScheduleState::new(jobs(4), 1);
        state.dispatch_next().unwrap().unwrap();
        let handles = state.begin_cancel();
        assert!(handles.is_empty(), "dispatched run has no process yet");
        assert_eq!(state.pending_len(), 0);
        assert_eq!(state.completed_len(), 3);
        assert!(state.is_cancelling());
        assert!(!state.can_dispatch());
        assert!(state
            .completed()
            .iter()
            .all(|r| r.failure == Some(FailureReason::Cancelled)));
    }

    #[test]
    fn test_snapshot_counts() {
        let mut state = ScheduleState::new(jobs(3), 2);
        let d = state.dispatch_next().unwrap().unwrap();
        lock(&d.telemetry).progress = 40;
        let snap = state.snapshot();
        assert_eq!(snap.pending, 2);
        assert_eq!(snap.active, 1);
        assert_eq!(snap.completed, 0);
        assert_eq!(snap.runs.len(), 1);
        assert_eq!(snap.runs[0].name, "job0");
        assert_eq!(snap.runs[0].state, JobState::Dispatched);
        assert_eq!(snap.runs[0].progress, 40);
    }

    #[test]
    fn test_states_cover_every_job() {
        let mut state = ScheduleState::new(jobs(3), 1);
        state.dispatch_next().unwrap().unwrap();
        let states = state.states();
        assert_eq!(states.len(), 3);
        assert_eq!(states[&0], JobState::Dispatched);
        assert_eq!(states[&2], JobState::Pending);
    }
}
