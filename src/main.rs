//! ep-batch CLI
//!
//! Entry point for the `ep-batch` command-line tool.

use clap::{Parser, Subcommand};
use ep_batch::config::{ConfigError, EffectiveConfig};
use ep_batch::monitor::{LinePresenter, PresentationSink};
use ep_batch::signal::SignalHandler;
use ep_batch::{discover_jobs, run_batch, CancelToken, ExitCode};
use serde_json::{json, Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ep-batch")]
#[command(about = "Run a directory of EnergyPlus models in parallel", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every model in a directory
    Run {
        /// Input directory containing the models and the weather file
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// EnergyPlus executable or installation directory
        #[arg(long, short = 'e')]
        engine: Option<PathBuf>,

        /// Maximum concurrent simulations (default: logical cores - 1)
        #[arg(long, short = 'j')]
        max_workers: Option<usize>,

        /// Resource sampling interval in milliseconds
        #[arg(long)]
        sample_interval_ms: Option<u64>,

        /// Per-job wall-clock timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Weather file (default: the single *.epw in DIR)
        #[arg(long, short = 'w')]
        weather: Option<PathBuf>,

        /// CSV report path; a bare file name is written into DIR
        #[arg(long)]
        csv_output: Option<PathBuf>,

        /// Also write a JSON batch summary to this path
        #[arg(long)]
        summary_json: Option<PathBuf>,

        /// Config file (default: DIR/ep-batch.toml if present)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Keep staging directories after each run
        #[arg(long)]
        keep_staging: bool,

        /// Search subdirectories for models
        #[arg(long, short = 'r')]
        recursive: bool,

        /// No live status display
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// List the jobs a run would execute
    Discover {
        /// Input directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Weather file (default: the single *.epw in DIR)
        #[arg(long, short = 'w')]
        weather: Option<PathBuf>,

        /// Search subdirectories for models
        #[arg(long, short = 'r')]
        recursive: bool,

        /// Config file (default: DIR/ep-batch.toml if present)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            dir,
            engine,
            max_workers,
            sample_interval_ms,
            timeout_secs,
            weather,
            csv_output,
            summary_json,
            config,
            keep_staging,
            recursive,
            quiet,
        } => {
            init_tracing(quiet);
            let mut overrides = Map::new();
            insert(&mut overrides, "engine_path", engine.map(path_value));
            insert(&mut overrides, "max_workers", max_workers.map(Value::from));
            insert(&mut overrides, "sample_interval_ms", sample_interval_ms.map(Value::from));
            insert(&mut overrides, "job_timeout_seconds", timeout_secs.map(Value::from));
            insert(&mut overrides, "keep_staging", keep_staging.then_some(Value::Bool(true)));
            overrides.insert(
                "discovery".to_string(),
                discovery_overrides(weather, recursive),
            );
            let mut report = Map::new();
            insert(&mut report, "csv_path", csv_output.map(path_value));
            insert(&mut report, "summary_path", summary_json.map(path_value));
            overrides.insert("report".to_string(), Value::Object(report));

            run_command(&dir, config.as_deref(), Value::Object(overrides), quiet)
        }
        Commands::Discover {
            dir,
            weather,
            recursive,
            config,
            json,
        } => {
            init_tracing(true);
            let overrides = json!({ "discovery": discovery_overrides(weather, recursive) });
            discover_command(&dir, config.as_deref(), overrides, json)
        }
    };

    process::exit(code.as_i32());
}

/// Log to stderr; `RUST_LOG` overrides the default filter.
fn init_tracing(quiet: bool) {
    let default = if quiet { "ep_batch=warn" } else { "ep_batch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn insert(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value);
    }
}

fn path_value(path: PathBuf) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

fn discovery_overrides(weather: Option<PathBuf>, recursive: bool) -> Value {
    let mut discovery = Map::new();
    insert(&mut discovery, "weather_file", weather.map(path_value));
    insert(&mut discovery, "recursive", recursive.then_some(Value::Bool(true)));
    Value::Object(discovery)
}

fn load_config(
    dir: &Path,
    config_path: Option<&Path>,
    overrides: Value,
) -> Result<EffectiveConfig, ConfigError> {
    let file = EffectiveConfig::locate_file(config_path, dir)?;
    EffectiveConfig::build(file.as_deref(), Some(overrides))
}

fn run_command(dir: &Path, config_path: Option<&Path>, overrides: Value, quiet: bool) -> ExitCode {
    let effective = match load_config(dir, config_path, overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::Config;
        }
    };

    let cancel = CancelToken::new();
    let signals = SignalHandler::new(cancel.clone());
    if let Err(e) = signals.install() {
        tracing::warn!(error = %e, "failed to install signal handler");
    }

    let sink: Option<Box<dyn PresentationSink>> = if quiet {
        None
    } else {
        Some(Box::new(LinePresenter::new(io::stderr())))
    };

    match run_batch(dir, &effective.config, cancel, sink) {
        Ok(report) => {
            eprintln!("{}", report.summary.human_summary);
            eprintln!("Wrote: {}", report.csv_path.display());
            if let Some(path) = &report.summary_path {
                eprintln!("Wrote: {}", path.display());
            }
            report.exit_code()
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn discover_command(dir: &Path, config_path: Option<&Path>, overrides: Value, json: bool) -> ExitCode {
    let effective = match load_config(dir, config_path, overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::Config;
        }
    };

    let jobs = match discover_jobs(dir, &effective.config) {
        Ok(jobs) => jobs,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };

    if json {
        match serde_json::to_string_pretty(&jobs) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::JobsFailed;
            }
        }
    } else {
        for job in &jobs {
            println!(
                "{:>4}  {:<32}  {}",
                job.seq + 1,
                job.name,
                job.model_path.display()
            );
        }
        if let Some(first) = jobs.first() {
            println!("weather: {}", first.weather_path.display());
        }
        eprintln!("{} job(s)", jobs.len());
    }
    ExitCode::Success
}
