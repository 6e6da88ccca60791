//! Presentation sink
//!
//! The scheduler publishes immutable [`ScheduleSnapshot`]s; a sink renders
//! them. Sinks never touch scheduler state.

use std::io::Write;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

use crate::state::{lock, JobState, ScheduleState};

/// Runtime view of one active run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRunView {
    pub name: String,
    pub state: JobState,
    pub pid: Option<u32>,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub progress: u8,
    pub warnings: u32,
    pub errors: u32,
    pub elapsed: Duration,
    pub last_line: Option<String>,
}

impl ActiveRunView {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Immutable view of the schedule at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleSnapshot {
    pub total: usize,
    pub max_workers: usize,
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelling: bool,
    pub runs: Vec<ActiveRunView>,
}

impl ScheduleSnapshot {
    /// Percentage of jobs that reached a terminal state
    pub fn overall_progress(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Receives snapshots from the display thread.
pub trait PresentationSink: Send {
    fn on_snapshot(&mut self, snapshot: &ScheduleSnapshot);

    /// Called once after the batch is quiescent
    fn on_finish(&mut self, _snapshot: &ScheduleSnapshot) {}
}

/// Discards every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PresentationSink for NullSink {
    fn on_snapshot(&mut self, _snapshot: &ScheduleSnapshot) {}
}

/// Plain line-oriented status printer.
///
/// Prints a header line per snapshot and one line per active run. Identical
/// consecutive snapshots are not printed again.
pub struct LinePresenter<W: Write + Send> {
    out: W,
    last: Option<String>,
}

impl<W: Write + Send> LinePresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out, last: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> PresentationSink for LinePresenter<W> {
    fn on_snapshot(&mut self, snapshot: &ScheduleSnapshot) {
        let rendered = render(snapshot);
        if self.last.as_deref() == Some(rendered.as_str()) {
            return;
        }
        let _ = self.out.write_all(rendered.as_bytes());
        let _ = self.out.flush();
        self.last = Some(rendered);
    }

    fn on_finish(&mut self, snapshot: &ScheduleSnapshot) {
        let _ = writeln!(
            self.out,
            "Done: {} succeeded, {} failed of {}",
            snapshot.succeeded, snapshot.failed, snapshot.total
        );
        let _ = self.out.flush();
    }
}

/// Display thread: snapshots the schedule every `interval` and hands the
/// snapshot to a sink. The state lock is released before the sink renders.
pub struct Display {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Display {
    pub fn spawn(
        state: Arc<Mutex<ScheduleState>>,
        mut sink: Box<dyn PresentationSink>,
        interval: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            loop {
                let snapshot = lock(&state).snapshot();
                sink.on_snapshot(&snapshot);
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
            let snapshot = lock(&state).snapshot();
            sink.on_finish(&snapshot);
        });
        Self { stop_tx, handle }
    }

    /// Render the final snapshot and join the thread.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            tracing::warn!("display thread panicked");
        }
    }
}

/// Render a snapshot as text lines.
pub fn render(snapshot: &ScheduleSnapshot) -> String {
    let mut text = format!(
        "[{:>5.1}%] pending {} | running {}/{} | done {} (ok {}, failed {}){}\n",
        snapshot.overall_progress(),
        snapshot.pending,
        snapshot.active,
        snapshot.max_workers,
        snapshot.completed,
        snapshot.succeeded,
        snapshot.failed,
        if snapshot.cancelling { " | cancelling" } else { "" },
    );
    for run in &snapshot.runs {
        text.push_str(&format!(
            "  {:<24} {:<10} {:>3}% cpu {:>6.1}% mem {:>8.1} MB  W {:<4} E {:<4} {}\n",
            run.name,
            run.state.to_string(),
            run.progress,
            run.cpu_percent,
            run.memory_mb(),
            run.warnings,
            run.errors,
            format_elapsed(run.elapsed),
        ));
        if let Some(line) = run.last_line.as_deref().filter(|l| !l.is_empty()) {
            text.push_str(&format!("      > {}\n", line));
        }
    }
    text
}

/// `HH:MM:SS`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ScheduleSnapshot {
        ScheduleSnapshot {
            total: 4,
            max_workers: 2,
            pending: 1,
            active: 1,
            completed: 2,
            succeeded: 1,
            failed: 1,
            cancelling: false,
            runs: vec![ActiveRunView {
                name: "office".to_string(),
                state: JobState::Running,
                pid: Some(42),
                cpu_percent: 97.5,
                memory_bytes: 3 * 1024 * 1024,
                progress: 33,
                warnings: 0,
                errors: 0,
                elapsed: Duration::from_secs(3661),
                last_line: None,
            }],
        }
    }

    #[test]
    fn test_render() {
        let text = render(&snapshot());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("50.0%"));
        assert!(lines[0].contains("running 1/2"));
        assert!(lines[1].contains("office"));
        assert!(lines[1].contains("Running"));
        assert!(lines[1].contains("3.0 MB"));
        assert!(lines[1].contains("W 0"));
        assert!(lines[1].contains("01:01:01"));
    }

    #[test]
    fn test_render_counts_and_last_line() {
        let mut snap = snapshot();
        snap.runs[0].warnings = 12;
        snap.runs[0].errors = 1;
        snap.runs[0].last_line = Some("Continuing Simulation at 4/1 for RUN PERIOD 1".to_string());

        let text = render(&snap);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("W 12"));
        assert!(lines[1].contains("E 1"));
        assert_eq!(lines[2], "      > Continuing Simulation at 4/1 for RUN PERIOD 1");
    }

    #[test]
    fn test_presenter_skips_duplicates() {
        let mut presenter = LinePresenter::new(Vec::new());
        presenter.on_snapshot(&snapshot());
        presenter.on_snapshot(&snapshot());
        presenter.on_finish(&snapshot());
        let out = String::from_utf8(presenter.into_inner()).unwrap();
        assert_eq!(out.matches("pending 1").count(), 1);
        assert!(out.ends_with("Done: 1 succeeded, 1 failed of 4\n"));
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            lock(&self.0).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_display_thread_finishes() {
        use crate::job::Job;
        use std::path::PathBuf;

        let jobs = (0..3)
            .map(|i| {
                Job::new(
                    i,
                    PathBuf::from(format!("/in/m{}.idf", i)),
                    PathBuf::from("/in/w.epw"),
                )
            })
            .collect();
        let state = Arc::new(Mutex::new(ScheduleState::new(jobs, 2)));
        let buf = SharedBuf::default();

        let display = Display::spawn(
            Arc::clone(&state),
            Box::new(LinePresenter::new(buf.clone())),
            Duration::from_millis(10),
        );
        lock(&state).begin_cancel();
        display.stop();

        let out = String::from_utf8(lock(&buf.0).clone()).unwrap();
        assert!(out.contains("running 0/2"));
        assert!(out.ends_with("Done: 0 succeeded, 3 failed of 3\n"));
    }

    #[test]
    fn test_empty_batch_progress() {
        let mut snap = snapshot();
        snap.total = 0;
        assert_eq!(snap.overall_progress(), 100.0);
    }
}
