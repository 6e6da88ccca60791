//! Bounded-concurrency batch scheduler
//!
//! The scheduler thread owns the dispatch loop:
//! 1. Fill free slots from the head of the pending queue (FIFO)
//! 2. Stage, launch and start a watcher + sampler per dispatched job
//! 3. Block on the completion channel for at most one sampling interval
//! 4. Classify each completion, move it to the completed set, backfill
//!
//! Cancellation stops dispatch, terminates every running process and fails
//! the pending queue. The batch ends when nothing is pending or active.

mod classify;
mod watcher;

pub use classify::classify;
pub use watcher::{read_err_file, Completion};

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ep_scan::{LineKind, MarkerScanner, OutputScanner};

use crate::job::Job;
use crate::runner::{ExitOutcome, Launcher, LineAction, LineObserver, TerminationCause};
use crate::sampler::{default_probe_factory, ProbeFactory, Sampler, DEFAULT_SAMPLE_INTERVAL};
use crate::signal::CancelToken;
use crate::stage::Stager;
use crate::state::{
    lock, now_utc, Dispatched, FailureReason, JobRun, ScheduleState, Telemetry,
};
use crate::timeout::{TimeoutConfig, TimeoutEnforcer};

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrency ceiling (W)
    pub max_workers: usize,
    /// Sampling and cancellation-check interval
    pub sample_interval: Duration,
    /// Optional per-job timeout
    pub timeout: TimeoutConfig,
    /// Keep staging directories after the run
    pub keep_staging: bool,
    /// Stop a run as soon as a fatal marker is printed
    pub terminate_on_fatal: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            timeout: TimeoutConfig::default(),
            keep_staging: false,
            terminate_on_fatal: true,
        }
    }
}

/// Logical cores minus one, at least one, never more than the job count.
pub fn default_max_workers(job_count: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    clamp_workers(cores.saturating_sub(1), job_count)
}

/// Clamp a requested worker count to `[1, job_count]`.
pub fn clamp_workers(requested: usize, job_count: usize) -> usize {
    requested.max(1).min(job_count.max(1))
}

/// Everything the batch produced
#[derive(Debug)]
pub struct BatchOutcome {
    /// One terminal run per discovered job, in completion order
    pub runs: Vec<JobRun>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Highest number of simultaneously active runs
    pub peak_active: usize,
    pub max_workers: usize,
    pub cancelled: bool,
}

/// Runs a batch of jobs with at most `max_workers` active at once.
pub struct Scheduler {
    config: SchedulerConfig,
    stager: Stager,
    launcher: Arc<dyn Launcher>,
    scanner: Arc<dyn OutputScanner>,
    probes: ProbeFactory,
    cancel: CancelToken,
    state: Arc<Mutex<ScheduleState>>,
}

impl Scheduler {
    pub fn new(
        jobs: Vec<Job>,
        config: SchedulerConfig,
        stager: Stager,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        let state = ScheduleState::new(jobs, config.max_workers);
        Self {
            config,
            stager,
            launcher,
            scanner: Arc::new(MarkerScanner::default()),
            probes: default_probe_factory(),
            cancel: CancelToken::new(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn OutputScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_probe_factory(mut self, probes: ProbeFactory) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Shared schedule state, for snapshot readers
    pub fn state(&self) -> Arc<Mutex<ScheduleState>> {
        Arc::clone(&self.state)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the batch to quiescence.
    pub fn run(self) -> BatchOutcome {
        let started_at = now_utc();
        let clock = Instant::now();
        let (tx, rx) = mpsc::channel::<Completion>();
        let mut cancel_started = false;

        {
            let state = lock(&self.state);
            tracing::info!(
                jobs = state.total(),
                max_workers = state.max_workers(),
                "starting batch"
            );
        }

        loop {
            if !cancel_started && self.cancel.is_cancelled() {
                cancel_started = true;
                self.begin_cancel();
            }

            self.fill_slots(&tx);

            if lock(&self.state).is_quiescent() {
                break;
            }

            match rx.recv_timeout(self.config.sample_interval) {
                Ok(completion) => self.complete(completion),
                Err(RecvTimeoutError::Timeout) => continue,
                // We hold a sender, so this cannot happen while runs are active.
                Err(RecvTimeoutError::Disconnected) => break,
            }
            while let Ok(completion) = rx.try_recv() {
                self.complete(completion);
            }
        }

        let state = lock(&self.state);
        if let Err(e) = state.check_partition() {
            tracing::error!(error = %e, "schedule partition violated");
        }
        let outcome = BatchOutcome {
            runs: state.completed().to_vec(),
            started_at,
            ended_at: now_utc(),
            elapsed: clock.elapsed(),
            peak_active: state.peak_active(),
            max_workers: state.max_workers(),
            cancelled: state.is_cancelling(),
        };
        tracing::info!(
            jobs = outcome.runs.len(),
            succeeded = outcome.runs.iter().filter(|r| r.succeeded()).count(),
            elapsed_secs = outcome.elapsed.as_secs(),
            cancelled = outcome.cancelled,
            "batch finished"
        );
        outcome
    }

    fn begin_cancel(&self) {
        let handles = lock(&self.state).begin_cancel();
        tracing::info!(running = handles.len(), "cancelling batch");
        for handle in handles {
            handle.terminate(TerminationCause::Cancelled);
        }
    }

    fn fill_slots(&self, tx: &Sender<Completion>) {
        loop {
            if self.cancel.is_cancelled() && !lock(&self.state).is_cancelling() {
                // Observed on the next loop iteration.
                return;
            }
            let next = lock(&self.state).dispatch_next();
            match next {
                Ok(Some(dispatched)) => self.start(dispatched, tx),
                Ok(None) => return,
                Err(e) => {
                    tracing::error!(error = %e, "dispatch failed");
                    return;
                }
            }
        }
    }

    /// Stage and launch one dispatched job. Failures finish the run
    /// immediately and free the slot.
    fn start(&self, dispatched: Dispatched, tx: &Sender<Completion>) {
        let dispatched_at = Instant::now();
        let Dispatched { job, telemetry } = dispatched;
        tracing::info!(job = %job.name, seq = job.seq, "dispatching");

        let staged = match self.stager.stage(&job) {
            Ok(staged) => staged,
            Err(e) => {
                tracing::warn!(job = %job.name, error = %e, "staging failed");
                self.fail_early(
                    job.seq,
                    FailureReason::StagingFailed {
                        message: e.to_string(),
                    },
                );
                return;
            }
        };
        lock(&self.state).set_work_dir(job.seq, staged.path().to_path_buf());

        let observer = self.observer(&telemetry);
        let handle = match self.launcher.launch(&job, &staged, observer) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                tracing::warn!(job = %job.name, error = %e, "launch failed");
                self.fail_early(
                    job.seq,
                    FailureReason::LaunchFailed {
                        message: e.to_string(),
                    },
                );
                if !self.config.keep_staging {
                    if let Err(e) = staged.cleanup() {
                        tracing::debug!(job = %job.name, error = %e, "staging cleanup failed");
                    }
                }
                return;
            }
        };

        if let Err(e) = lock(&self.state).mark_running(job.seq, Arc::clone(&handle)) {
            tracing::error!(job = %job.name, error = %e, "state transition rejected");
        }
        tracing::info!(job = %job.name, pid = handle.pid(), "running");

        let sampler = Sampler::spawn(
            job.name.clone(),
            Arc::clone(&handle),
            telemetry,
            (self.probes)(),
            self.config.sample_interval,
            TimeoutEnforcer::started_at(self.config.timeout, dispatched_at),
        );
        watcher::spawn_watcher(job, staged, handle, sampler, tx.clone());
    }

    fn observer(&self, telemetry: &Arc<Mutex<Telemetry>>) -> LineObserver {
        let scanner = Arc::clone(&self.scanner);
        let telemetry = Arc::clone(telemetry);
        let terminate_on_fatal = self.config.terminate_on_fatal;
        Arc::new(move |line: &str| {
            let kind = scanner.classify_line(line);
            lock(&telemetry).record_line(line, kind);
            if terminate_on_fatal && kind == LineKind::Fatal {
                LineAction::Terminate
            } else {
                LineAction::Continue
            }
        })
    }

    fn fail_early(&self, seq: usize, reason: FailureReason) {
        if let Some(Err(e)) = lock(&self.state).finish(seq, |run, _| run.fail(reason)) {
            tracing::error!(seq, error = %e, "state transition rejected");
        }
    }

    fn complete(&self, completion: Completion) {
        let Completion {
            job,
            staged,
            result,
        } = completion;
        let (seq, name) = (job.seq, job.name.as_str());

        let outcome = result.unwrap_or_else(|e| {
            tracing::warn!(job = %name, error = %e, "wait failed");
            ExitOutcome::default()
        });

        let mut scan = self.scanner.scan(&outcome.output);
        let err_file = self.launcher.err_file(&job, &staged);
        if let Some(lines) = read_err_file(&err_file) {
            scan.merge(self.scanner.scan(&lines));
        }

        let mut state = lock(&self.state);
        let verdict = classify(&outcome, &scan, state.is_cancelling());
        let finished = state.finish(seq, move |run, _| {
            run.exit_code = outcome.exit_code;
            run.output = outcome.output;
            run.warnings = scan.warnings();
            run.errors = scan.errors();
            run.first_error = scan.first_error;
            match verdict {
                Ok(()) => run.succeed(),
                Err(reason) => run.fail(reason),
            }
        });
        match finished {
            Some(Ok(final_state)) => {
                let elapsed = state
                    .last_completed()
                    .map(|r| r.elapsed.as_secs())
                    .unwrap_or(0);
                tracing::info!(job = %name, state = %final_state, elapsed_secs = elapsed, "finished");
            }
            Some(Err(e)) => tracing::error!(job = %name, error = %e, "state transition rejected"),
            None => tracing::error!(job = %name, seq, "completion for unknown run"),
        }
        drop(state);

        if !self.config.keep_staging {
            if let Err(e) = staged.cleanup() {
                tracing::debug!(job = %name, error = %e, "staging cleanup failed");
            }
        }
    }
}
