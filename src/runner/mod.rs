//! Engine process execution
//!
//! - [`Engine`] locates the simulation executable and its support files
//! - [`Launcher`] starts one engine process per staged job
//! - [`ProcessHandle`] owns the child: streaming output, wait, terminate

mod engine;
mod process;

pub use engine::{ArgContext, ArgTemplate, Engine, DEFAULT_ENGINE_ARGS, SUPPORT_FILES};
pub use process::{
    spawn, ExitOutcome, LineAction, LineObserver, ProcessHandle, TerminationCause,
    DEFAULT_TERMINATION_GRACE,
};

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::job::Job;
use crate::stage::StagedDir;

/// Errors from locating or running the engine
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("engine not found at {path}")]
    EngineNotFound { path: PathBuf },

    #[error("engine at {path} is not executable")]
    EngineNotExecutable { path: PathBuf },

    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("process {pid} was already waited on")]
    AlreadyWaited { pid: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Starts an engine process for a staged job.
pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        job: &Job,
        staged: &StagedDir,
        observer: LineObserver,
    ) -> Result<ProcessHandle, RunnerError>;

    /// Directory the engine writes its `<name>.*` outputs into
    fn output_dir(&self, _job: &Job, staged: &StagedDir) -> PathBuf {
        staged.path().to_path_buf()
    }

    /// The engine's `<name>.err` diagnostics file for this job
    fn err_file(&self, job: &Job, staged: &StagedDir) -> PathBuf {
        self.output_dir(job, staged).join(format!("{}.err", job.name))
    }
}

/// Launches the located engine with an argument template.
#[derive(Debug, Clone)]
pub struct EngineLauncher {
    engine: Engine,
    args: ArgTemplate,
    output_dir: Option<PathBuf>,
    grace: Duration,
}

impl EngineLauncher {
    pub fn new(engine: Engine, args: ArgTemplate) -> Self {
        Self {
            engine,
            args,
            output_dir: None,
            grace: DEFAULT_TERMINATION_GRACE,
        }
    }

    /// Write engine outputs to a shared directory instead of next to each
    /// model file
    pub fn with_output_dir(mut self, output_dir: Option<PathBuf>) -> Self {
        self.output_dir = output_dir;
        self
    }

    /// Time between SIGTERM and SIGKILL when terminating
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Directory the engine writes `<name>.*` outputs into for this job.
    ///
    /// Defaults to the model file's own directory; the `-p <name>` prefix
    /// keeps jobs apart there.
    pub fn output_dir_for(&self, job: &Job, staged: &StagedDir) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(|| job.model_path.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| staged.path().to_path_buf())
    }

    /// Build the command line without spawning it
    pub fn command(&self, job: &Job, staged: &StagedDir) -> Command {
        let output_dir = self.output_dir_for(job, staged);
        let ctx = ArgContext {
            weather: staged.weather_file(),
            model: staged.model_file(),
            name: &job.name,
            output_dir: &output_dir,
            work_dir: staged.path(),
        };
        let mut command = Command::new(self.engine.executable());
        command
            .args(self.args.render(&ctx))
            .current_dir(staged.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl Launcher for EngineLauncher {
    fn launch(
        &self,
        job: &Job,
        staged: &StagedDir,
        observer: LineObserver,
    ) -> Result<ProcessHandle, RunnerError> {
        let output_dir = self.output_dir_for(job, staged);
        if !output_dir.exists() {
            std::fs::create_dir_all(&output_dir)?;
        }
        // A leftover .err from an earlier batch must not be scanned as this run's.
        let err_file = self.err_file(job, staged);
        match std::fs::remove_file(&err_file) {
            Ok(()) => {
                tracing::debug!(job = %job.name, path = %err_file.display(), "removed previous .err file")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let command = self.command(job, staged);
        let handle = spawn(command, observer, self.grace)?;
        tracing::debug!(job = %job.name, pid = handle.pid(), "engine launched");
        Ok(handle)
    }

    fn output_dir(&self, job: &Job, staged: &StagedDir) -> PathBuf {
        self.output_dir_for(job, staged)
    }
}
