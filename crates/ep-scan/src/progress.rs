//! Progress estimation from EnergyPlus console output.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::markers::normalize;

fn warmup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"warming up \{\s*(\d+)\s*\}").expect("valid regex"))
}

fn continuing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"continuing simulation at (\d{1,2})/\d{1,2}").expect("valid regex")
    })
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"percentage through simulation:\s*(\d+(?:\.\d+)?)\s*%").expect("valid regex")
    })
}

/// Estimate a new progress percentage from one output line.
///
/// Returns `None` when the line carries no progress information or would
/// move progress backwards.
pub fn estimate_progress(line: &str, current: u8) -> Option<u8> {
    let line = normalize(line);

    let estimate = if line.contains("energyplus completed successfully") {
        Some(100)
    } else if let Some(pct) = percent_re()
        .captures(&line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        Some(pct.clamp(0.0, 100.0) as u8)
    } else if let Some(month) = continuing_re()
        .captures(&line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
    {
        Some(((month.min(12) * 100) / 12) as u8)
    } else if let Some(n) = warmup_re()
        .captures(&line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
    {
        Some((5 + n.saturating_mul(2)).min(99) as u8)
    } else if line.contains("starting simulation at") {
        Some(5)
    } else if line.contains("energyplus starting") || line.contains("energyplus, version") {
        Some(1)
    } else {
        None
    };

    estimate.filter(|p| *p > current)
}
