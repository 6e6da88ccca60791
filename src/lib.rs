//! ep-batch - bounded-concurrency EnergyPlus batch runner
//!
//! Discovers simulation models in a directory, runs each one in its own
//! staging directory with at most W engine processes alive at once, samples
//! their resource use, and writes one report row per model.

pub mod batch;
pub mod config;
pub mod job;
pub mod monitor;
pub mod registry;
pub mod report;
pub mod runner;
pub mod sampler;
pub mod scheduler;
pub mod signal;
pub mod stage;
pub mod state;
pub mod timeout;

pub use batch::{discover_jobs, run_batch, BatchError, BatchReport};
pub use config::{BatchConfig, ConfigError, EffectiveConfig};
pub use job::Job;
pub use report::{BatchSummary, ExitCode, ReportRow};
pub use scheduler::{BatchOutcome, Scheduler, SchedulerConfig};
pub use signal::CancelToken;
pub use state::{FailureReason, JobRun, JobState};
