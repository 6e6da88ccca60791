//! Per-run watcher thread
//!
//! Blocks in `wait()` for one process, stops its sampler and reports the
//! outcome to the scheduler over the completion channel.

use std::fs;
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::job::Job;
use crate::runner::{ExitOutcome, ProcessHandle, RunnerError};
use crate::sampler::Sampler;
use crate::stage::StagedDir;

/// Completion event sent by a watcher
#[derive(Debug)]
pub struct Completion {
    pub job: Job,
    pub staged: StagedDir,
    pub result: Result<ExitOutcome, RunnerError>,
}

pub fn spawn_watcher(
    job: Job,
    staged: StagedDir,
    handle: Arc<ProcessHandle>,
    sampler: Sampler,
    tx: Sender<Completion>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let result = handle.wait();
        sampler.stop();
        // The receiver only goes away if the scheduler itself is gone.
        let _ = tx.send(Completion {
            job,
            staged,
            result,
        });
    })
}

/// Lines of the engine's `.err` file, if it wrote one.
pub fn read_err_file(path: &Path) -> Option<Vec<String>> {
    let bytes = fs::read(path).ok()?;
    Some(
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect(),
    )
}
