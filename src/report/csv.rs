//! Delimited-text report
//!
//! Header:
//! `#,Job_ID,WeatherFile,ModelFile,Progress,Message,Warnings,Errors,Hours,Minutes,Seconds`
//!
//! `Progress` is 1 for success and 0 for failure. Hours, minutes and seconds
//! are zero-padded to two digits. Fields containing a comma, quote or line
//! break are quoted.

use std::io::{self, Write};
use std::path::Path;

use super::{write_atomic, ReportRow};

pub const CSV_HEADER: &[&str] = &[
    "#",
    "Job_ID",
    "WeatherFile",
    "ModelFile",
    "Progress",
    "Message",
    "Warnings",
    "Errors",
    "Hours",
    "Minutes",
    "Seconds",
];

/// Quote a field if it needs it.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn record(row: &ReportRow) -> Vec<String> {
    vec![
        row.seq.to_string(),
        escape_field(&row.job_id),
        escape_field(&row.weather_file),
        escape_field(&row.model_file),
        u8::from(row.success).to_string(),
        escape_field(&row.message),
        row.warnings.to_string(),
        row.errors.to_string(),
        format!("{:02}", row.elapsed.hours),
        format!("{:02}", row.elapsed.minutes),
        format!("{:02}", row.elapsed.seconds),
    ]
}

/// Write header and rows.
pub fn write_csv<W: Write>(out: &mut W, rows: &[ReportRow]) -> io::Result<()> {
    writeln!(out, "{}", CSV_HEADER.join(","))?;
    for row in rows {
        writeln!(out, "{}", record(row).join(","))?;
    }
    Ok(())
}

/// Render the report as a string.
pub fn to_csv_string(rows: &[ReportRow]) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_csv(&mut buf, rows);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Write the report file atomically.
pub fn write_csv_file(path: &Path, rows: &[ReportRow]) -> io::Result<()> {
    write_atomic(path, to_csv_string(rows).as_bytes())
}
