//! Result integration tests
//!
//! Exit classification, report rows, staging isolation and configuration
//! errors, driven with `/bin/sh` as the engine.

#![cfg(unix)]

mod fixtures;

use std::fs;
use std::sync::Arc;

use ep_batch::report::csv::CSV_HEADER;
use ep_batch::report::{aggregate, SUCCESS_MESSAGE};
use ep_batch::runner::{ArgTemplate, Engine, EngineLauncher, RunnerError};
use ep_batch::stage::Stager;
use ep_batch::{
    discover_jobs, run_batch, BatchError, BatchSummary, CancelToken, ExitCode, FailureReason,
    JobState, Scheduler,
};
use fixtures::{BatchDir, SUCCESS_SCRIPT};
use serde_json::json;

// === Classification ===

#[test]
fn test_exit_codes_classify_runs() {
    let dir = BatchDir::new();
    dir.add_model(
        "good",
        "echo '   ** Warning ** Surface tilt'\n\
         echo 'EnergyPlus Completed Successfully-- 3 Warning; 0 Severe Errors'\n\
         exit 0\n",
    );
    dir.add_model(
        "bad",
        "echo 'Initializing Simulation'\n\
         echo '   ** Severe  ** Node not found: SUPPLY INLET'\n\
         echo '   ** Severe  ** second problem'\n\
         exit 1\n",
    );
    let config = dir.config(2, json!({}));

    let report = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap();
    let runs = &report.outcome.runs;

    let good = runs.iter().find(|r| r.job.name == "good").unwrap();
    assert_eq!(good.state, JobState::Succeeded);
    assert_eq!(good.exit_code, Some(0));
    // The engine's own tally wins over the marker count
    assert_eq!(good.warnings, 3);

    let bad = runs.iter().find(|r| r.job.name == "bad").unwrap();
    assert_eq!(bad.state, JobState::Failed);
    assert_eq!(
        bad.failure,
        Some(FailureReason::EngineRuntimeFailure {
            exit_code: Some(1),
            signal: None
        })
    );
    assert_eq!(bad.errors, 2);

    let bad_row = report.rows.iter().find(|r| r.job_id == "bad").unwrap();
    assert!(!bad_row.success);
    assert_eq!(bad_row.message, "** Severe  ** Node not found: SUPPLY INLET");

    let good_row = report.rows.iter().find(|r| r.job_id == "good").unwrap();
    assert_eq!(good_row.message, SUCCESS_MESSAGE);
    assert_eq!(report.exit_code(), ExitCode::JobsFailed);
}

#[test]
fn test_fatal_line_stops_run() {
    let dir = BatchDir::new();
    dir.add_model(
        "fatal",
        "echo '   **  Fatal  ** GetSurfaceData: Errors found in input'\nsleep 30\nexit 0\n",
    );
    let config = dir.config(1, json!({}));

    let report = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap();
    let run = &report.outcome.runs[0];

    assert_eq!(run.failure, Some(FailureReason::FatalError));
    assert!(run.elapsed.as_secs() < 20);
    assert_eq!(
        report.rows[0].message,
        "**  Fatal  ** GetSurfaceData: Errors found in input"
    );
}

#[test]
fn test_fatal_marker_with_exit_zero_is_failure() {
    let dir = BatchDir::new();
    dir.add_model("odd", "echo '** Fatal ** bad'\nexit 0\n");
    let config = dir.config(1, json!({"terminate_on_fatal": false}));

    let report = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap();
    assert_eq!(report.outcome.runs[0].failure, Some(FailureReason::FatalError));
}

#[test]
fn test_err_file_is_scanned() {
    let dir = BatchDir::new();
    // The engine writes <name>.err into the output directory
    let out = dir.path().join("out");
    dir.add_model(
        "witherr",
        &format!(
            "mkdir -p '{out}'\nprintf '   ** Warning ** a\\n   ** Warning ** b\\n' > '{out}/witherr.err'\n{}",
            SUCCESS_SCRIPT.replace("-- 0 Warning; 0 Severe Errors", ""),
            out = out.display()
        ),
    );
    let config = dir.config(1, json!({"output_dir": out.to_string_lossy()}));

    let report = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap();
    let run = &report.outcome.runs[0];
    assert_eq!(run.state, JobState::Succeeded);
    assert_eq!(run.warnings, 2);
}

#[test]
fn test_leftover_err_file_is_not_scanned() {
    let dir = BatchDir::new();
    dir.add_model("office", SUCCESS_SCRIPT);
    // Left next to the model by an earlier failed batch
    let stale = dir.path().join("office.err");
    fs::write(&stale, "   **  Fatal  ** old failure from yesterday\n").unwrap();
    let config = dir.config(1, json!({}));

    let report = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap();
    let run = &report.outcome.runs[0];

    assert_eq!(run.state, JobState::Succeeded);
    assert_eq!(run.failure, None);
    assert_eq!(run.errors, 0);
    assert_eq!(report.rows[0].message, SUCCESS_MESSAGE);
    assert!(!stale.exists());
    assert_eq!(report.exit_code(), ExitCode::Success);
}

// === Staging ===

#[test]
fn test_staging_dirs_are_isolated() {
    let dir = BatchDir::new();
    let script = "touch \"$(basename \"$0\").mark\"\n\
                  sleep 0.2\n\
                  count=$(ls *.mark | wc -l | tr -d ' ')\n\
                  [ \"$count\" -eq 1 ] || exit 3\n\
                  [ -f Energy+.ini ] || exit 4\n\
                  [ -f site.epw ] || exit 5\n\
                  exit 0\n";
    for i in 0..4 {
        dir.add_model(&format!("iso{}", i), script);
    }
    let config = dir.config(4, json!({"keep_staging": true}));

    let report = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap();

    assert!(
        report.outcome.runs.iter().all(|r| r.state == JobState::Succeeded),
        "{:?}",
        report.rows
    );
    let staged = dir.staged_dirs();
    assert_eq!(staged.len(), 4);
    let work_dirs: std::collections::HashSet<_> = report
        .outcome
        .runs
        .iter()
        .filter_map(|r| r.work_dir.clone())
        .collect();
    assert_eq!(work_dirs.len(), 4);
    for path in &staged {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("EP_iso"), "{}", name);
        let marks = fs::read_dir(path)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".mark"))
            .count();
        assert_eq!(marks, 1);
    }
    // Models in the input directory are left untouched
    assert!(!dir.path().join("iso0.idf.mark").exists());
}

#[test]
fn test_staging_removed_by_default() {
    let dir = BatchDir::new();
    dir.add_model("a", SUCCESS_SCRIPT);
    dir.add_model("b", "exit 2\n");
    let config = dir.config(2, json!({}));

    run_batch(dir.path(), &config, CancelToken::new(), None).unwrap();
    assert!(dir.staged_dirs().is_empty());
}

#[test]
fn test_staging_failure_fails_only_that_job() {
    let dir = BatchDir::new();
    for name in ["alpha", "bravo", "charlie"] {
        dir.add_model(name, SUCCESS_SCRIPT);
    }
    let config = dir.config(2, json!({}));
    let jobs = discover_jobs(dir.path(), &config).unwrap();
    // The model disappears between discovery and staging
    fs::remove_file(dir.path().join("bravo.idf")).unwrap();

    let engine = Engine::locate(config.require_engine().unwrap()).unwrap();
    let launcher = EngineLauncher::new(engine, ArgTemplate::new(config.engine_args.clone()));
    let outcome = Scheduler::new(
        jobs.clone(),
        config.scheduler_config(jobs.len()),
        Stager::new(config.staging_root()),
        Arc::new(launcher),
    )
    .run();

    assert_eq!(outcome.runs.len(), 3);
    for run in &outcome.runs {
        if run.job.name == "bravo" {
            assert_eq!(run.state, JobState::Failed);
            assert!(
                matches!(run.failure, Some(FailureReason::StagingFailed { .. })),
                "{:?}",
                run.failure
            );
            assert!(run.pid.is_none());
        } else {
            assert_eq!(run.state, JobState::Succeeded, "{}", run.job.name);
        }
    }

    let rows = aggregate(&outcome.runs);
    let names: Vec<&str> = rows.iter().map(|r| r.job_id.as_str()).collect();
    assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
    assert!(rows[1].message.starts_with("Staging failed"));
    assert!(dir.staged_dirs().is_empty());
}

// === Reports ===

#[test]
fn test_report_has_one_row_per_job() {
    let dir = BatchDir::new();
    for i in 0..5 {
        let script = if i % 2 == 0 { SUCCESS_SCRIPT } else { "exit 1\n" };
        dir.add_model(&format!("case{}", i), script);
    }
    let summary_path = dir.path().join("reports/batch_summary.json");
    let config = dir.config(
        3,
        json!({"report": {"summary_path": summary_path.to_string_lossy()}}),
    );

    let report = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap();

    let text = fs::read_to_string(&report.csv_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], CSV_HEADER.join(","));
    for (i, line) in lines[1..].iter().enumerate() {
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 11, "{}", line);
        assert_eq!(fields[0], (i + 1).to_string());
        assert_eq!(fields[1], format!("case{}", i));
        assert_eq!(fields[2], "site.epw");
        assert_eq!(fields[4], if i % 2 == 0 { "1" } else { "0" });
        assert!(!fields[5].is_empty());
        assert_eq!(fields[8].len(), 2);
    }
    assert_eq!(
        report.csv_path,
        dir.path().canonicalize().unwrap().join("simulation_results.csv")
    );

    let summary = BatchSummary::from_file(&summary_path).unwrap();
    assert_eq!(summary.job_count, 5);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.exit_code, 1);
    assert!(summary.peak_active <= 3);
}

// === Configuration and discovery errors ===

#[test]
fn test_missing_engine_is_config_error() {
    let dir = BatchDir::new();
    dir.add_model("a", SUCCESS_SCRIPT);
    let mut config = dir.config(1, json!({}));
    config.engine_path = None;

    let err = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap_err();
    assert!(matches!(err, BatchError::Config(_)));
    assert_eq!(err.exit_code(), ExitCode::Config);

    config.engine_path = Some(dir.path().join("no-such-engine"));
    let err = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap_err();
    assert!(matches!(err, BatchError::Engine(_)));
    assert_eq!(err.exit_code(), ExitCode::Config);
}

#[test]
fn test_non_executable_engine_is_config_error() {
    use std::os::unix::fs::PermissionsExt;

    let dir = BatchDir::new();
    dir.add_model("a", SUCCESS_SCRIPT);
    let install = tempfile::TempDir::new().unwrap();
    let exe = install.path().join("energyplus");
    fs::write(&exe, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o644)).unwrap();
    let mut config = dir.config(1, json!({}));
    config.engine_path = Some(install.path().to_path_buf());

    let err = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap_err();
    assert!(
        matches!(err, BatchError::Engine(RunnerError::EngineNotExecutable { .. })),
        "{}",
        err
    );
    assert_eq!(err.exit_code(), ExitCode::Config);
    assert!(dir.staged_dirs().is_empty());
    assert!(!dir.path().join("simulation_results.csv").exists());
}

#[test]
fn test_ambiguous_weather_stops_before_running() {
    let dir = BatchDir::new();
    dir.add_model("a", SUCCESS_SCRIPT);
    fs::write(dir.path().join("other.epw"), "LOCATION\n").unwrap();
    let config = dir.config(1, json!({}));

    let err = run_batch(dir.path(), &config, CancelToken::new(), None).unwrap_err();
    assert!(matches!(err, BatchError::Registry(_)));
    assert!(err.to_string().contains("found 2"));
    assert!(!dir.path().join("simulation_results.csv").exists());

    let config = dir.config(1, json!({"discovery": {"weather_file": "other.epw"}}));
    let jobs = discover_jobs(dir.path(), &config).unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].weather_path.ends_with("other.epw"));
}

#[test]
fn test_empty_directory_is_error() {
    let dir = BatchDir::new();
    let config = dir.config(1, json!({}));
    let err = discover_jobs(dir.path(), &config).unwrap_err();
    assert!(err.to_string().contains("*.idf"));
}
