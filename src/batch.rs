//! Batch orchestration
//!
//! Wires the pieces together for one invocation:
//! - Discover jobs in the input directory
//! - Locate the engine and build the stager, launcher and scanner
//! - Run the scheduler with an optional display thread
//! - Write the CSV report and the JSON summary
//!
//! Configuration and discovery errors stop the batch before anything runs.
//! Once jobs are dispatched every job ends up as exactly one report row.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ep_scan::MarkerScanner;
use thiserror::Error;

use crate::config::{BatchConfig, ConfigError};
use crate::job::{generate_batch_id, Job};
use crate::monitor::{Display, PresentationSink};
use crate::registry::{discover, RegistryError};
use crate::report::{self, BatchSummary, ExitCode, ReportRow};
use crate::runner::{ArgTemplate, Engine, EngineLauncher, RunnerError};
use crate::scheduler::{BatchOutcome, Scheduler};
use crate::signal::CancelToken;
use crate::stage::Stager;

/// Errors that stop a batch
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("discovery error: {0}")]
    Registry(#[from] RegistryError),

    #[error("engine error: {0}")]
    Engine(#[from] RunnerError),

    #[error("failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BatchError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            BatchError::Config(_) | BatchError::Registry(_) | BatchError::Engine(_) => {
                ExitCode::Config
            }
            BatchError::Output { .. } => ExitCode::JobsFailed,
        }
    }
}

/// Result of a finished batch
#[derive(Debug)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub rows: Vec<ReportRow>,
    pub summary: BatchSummary,
    pub csv_path: PathBuf,
    pub summary_path: Option<PathBuf>,
}

impl BatchReport {
    pub fn exit_code(&self) -> ExitCode {
        self.summary.status.exit_code()
    }
}

/// Discover the jobs a batch would run.
pub fn discover_jobs(input_dir: &Path, config: &BatchConfig) -> Result<Vec<Job>, BatchError> {
    Ok(discover(input_dir, &config.discovery_options())?)
}

/// Run every job in `input_dir` and write the reports.
pub fn run_batch(
    input_dir: &Path,
    config: &BatchConfig,
    cancel: CancelToken,
    sink: Option<Box<dyn PresentationSink>>,
) -> Result<BatchReport, BatchError> {
    let engine = Engine::locate(config.require_engine()?)?;
    let jobs = discover_jobs(input_dir, config)?;
    // Discovery succeeded, so the directory exists.
    let input_dir = input_dir
        .canonicalize()
        .unwrap_or_else(|_| input_dir.to_path_buf());

    let batch_id = generate_batch_id();
    let scheduler_config = config.scheduler_config(jobs.len());
    tracing::info!(
        batch = %batch_id,
        jobs = jobs.len(),
        max_workers = scheduler_config.max_workers,
        engine = %engine.executable().display(),
        "batch configured"
    );

    let stager = Stager::new(config.staging_root()).with_support_files(engine.support_files());
    let launcher = EngineLauncher::new(engine, ArgTemplate::new(config.engine_args.clone()))
        .with_output_dir(config.output_dir.clone())
        .with_grace(config.termination_grace());
    let scanner = MarkerScanner::new(&config.markers);

    let scheduler = Scheduler::new(jobs, scheduler_config, stager, Arc::new(launcher))
        .with_scanner(Arc::new(scanner))
        .with_cancel_token(cancel);

    let display = sink.map(|sink| Display::spawn(scheduler.state(), sink, config.sample_interval()));
    let outcome = scheduler.run();
    if let Some(display) = display {
        display.stop();
    }

    let rows = report::aggregate(&outcome.runs);
    let summary = BatchSummary::from_outcome(batch_id, &outcome);

    let csv_path = config.csv_path(&input_dir);
    report::csv::write_csv_file(&csv_path, &rows).map_err(|source| BatchError::Output {
        path: csv_path.clone(),
        source,
    })?;
    tracing::info!(path = %csv_path.display(), rows = rows.len(), "report written");

    let summary_path = config.summary_path(&input_dir);
    if let Some(path) = &summary_path {
        summary
            .write_to_file(path)
            .map_err(|source| BatchError::Output {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), "summary written");
    }

    Ok(BatchReport {
        outcome,
        rows,
        summary,
        csv_path,
        summary_path,
    })
}
