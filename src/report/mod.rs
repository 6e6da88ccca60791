//! Batch results: report rows, CSV and JSON summary
//!
//! - [`aggregate`] projects completed runs into ordered [`ReportRow`]s
//! - [`csv`] writes the delimited-text report
//! - [`summary`] writes `batch_summary.json` and computes the exit code

pub mod csv;
mod row;
pub mod summary;

pub use row::{aggregate, message_for, ElapsedParts, ReportRow, SUCCESS_MESSAGE};
pub use summary::{BatchStatus, BatchSummary, ExitCode, JobEntry};

use std::fs;
use std::io;
use std::path::Path;

/// Write `contents` to `path` via a temporary file and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}
