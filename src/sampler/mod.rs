//! Resource sampling for running engine processes
//!
//! One sampler thread per running job. Each tick it sums CPU time and
//! resident memory over the process and its descendants and publishes the
//! result into the job's telemetry cell. Failed samples are skipped.
//!
//! The same tick enforces the per-job timeout.

#[cfg(target_os = "linux")]
mod proc_tree;

#[cfg(target_os = "linux")]
pub use proc_tree::ProcTreeProbe;

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::runner::{ProcessHandle, TerminationCause};
use crate::state::{lock, Telemetry};
use crate::timeout::{TimeoutEnforcer, TimeoutStatus};

/// Default sampling interval
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// One resource observation for a process tree
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSample {
    /// CPU usage since the previous sample, 100.0 = one full core
    pub cpu_percent: f32,
    /// Resident memory in bytes
    pub memory_bytes: u64,
}

/// Source of resource samples for a process tree.
pub trait ResourceProbe: Send {
    /// Sample `pid` and its descendants; `None` when the process is gone or
    /// unreadable.
    fn sample(&mut self, pid: u32) -> Option<ResourceSample>;
}

/// Probe that never reports anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProbe;

impl ResourceProbe for NullProbe {
    fn sample(&mut self, _pid: u32) -> Option<ResourceSample> {
        None
    }
}

/// Creates one probe per job
pub type ProbeFactory = Arc<dyn Fn() -> Box<dyn ResourceProbe> + Send + Sync>;

/// Platform probe: `/proc` on Linux, nothing elsewhere
pub fn default_probe() -> Box<dyn ResourceProbe> {
    #[cfg(target_os = "linux")]
    {
        Box::new(ProcTreeProbe::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(NullProbe)
    }
}

pub fn default_probe_factory() -> ProbeFactory {
    Arc::new(default_probe)
}

/// A running sampler thread. Dropping `stop` also stops it.
#[derive(Debug)]
pub struct Sampler {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl Sampler {
    /// Start sampling `handle` every `interval`.
    pub fn spawn(
        job: String,
        handle: Arc<ProcessHandle>,
        telemetry: Arc<Mutex<Telemetry>>,
        mut probe: Box<dyn ResourceProbe>,
        interval: Duration,
        enforcer: TimeoutEnforcer,
    ) -> Self {
        let (stop, stop_rx) = mpsc::channel::<()>();
        let thread = thread::spawn(move || {
            let pid = handle.pid();
            let mut timed_out = false;
            loop {
                if !handle.is_running() {
                    break;
                }
                if let Some(sample) = probe.sample(pid) {
                    lock(&telemetry).record_sample(sample);
                }
                if !timed_out {
                    if let TimeoutStatus::Exceeded { seconds } = enforcer.check() {
                        tracing::warn!(job = %job, pid, seconds, "job timed out");
                        handle.terminate(TerminationCause::TimedOut { seconds });
                        timed_out = true;
                    }
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        Self { stop, thread }
    }

    /// Stop the thread and wait for it.
    pub fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.thread.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(u64);

    impl ResourceProbe for FixedProbe {
        fn sample(&mut self, _pid: u32) -> Option<ResourceSample> {
            self.0 += 1;
            Some(ResourceSample {
                cpu_percent: 50.0,
                memory_bytes: self.0 * 1024,
            })
        }
    }

    #[test]
    fn test_null_probe() {
        assert!(NullProbe.sample(1).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_sampler_publishes_and_times_out() {
        use crate::runner::{spawn, LineAction, LineObserver};
        use crate::timeout::TimeoutConfig;
        use std::process::{Command, Stdio};

        let mut command = Command::new("/bin/sh");
        command
            .args(["-c", "sleep 30"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let observer: LineObserver = Arc::new(|_: &str| LineAction::Continue);
        let handle = Arc::new(spawn(command, observer, Duration::from_secs(1)).unwrap());
        let telemetry = Arc::new(Mutex::new(Telemetry::default()));

        let sampler = Sampler::spawn(
            "sleeper".to_string(),
            Arc::clone(&handle),
            Arc::clone(&telemetry),
            Box::new(FixedProbe(0)),
            Duration::from_millis(50),
            TimeoutEnforcer::new(TimeoutConfig::new(Some(1))),
        );

        let outcome = handle.wait().unwrap();
        sampler.stop();

        assert_eq!(
            outcome.termination,
            Some(TerminationCause::TimedOut { seconds: 1 })
        );
        let telemetry = lock(&telemetry);
        assert!(telemetry.samples >= 2);
        assert_eq!(telemetry.cpu_percent, 50.0);
        assert_eq!(telemetry.peak_memory_bytes, telemetry.samples * 1024);
    }
}
