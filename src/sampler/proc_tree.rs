//! `/proc` probe: CPU ticks and RSS summed over a process tree

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use super::{ResourceProbe, ResourceSample};

#[derive(Debug, Clone, Copy)]
struct ProcUsage {
    pid: i32,
    ticks: u64,
    rss_pages: u64,
}

/// Samples a process and all its descendants from `/proc`.
#[derive(Debug)]
pub struct ProcTreeProbe {
    page_size: u64,
    ticks_per_second: f64,
    last: Option<(u64, Instant)>,
}

impl Default for ProcTreeProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcTreeProbe {
    pub fn new() -> Self {
        Self {
            page_size: procfs::page_size(),
            ticks_per_second: procfs::ticks_per_second() as f64,
            last: None,
        }
    }
}

impl ResourceProbe for ProcTreeProbe {
    fn sample(&mut self, pid: u32) -> Option<ResourceSample> {
        let (ticks, rss_pages) = tree_usage(pid as i32)?;
        let now = Instant::now();

        // The first sample only establishes the baseline.
        let cpu_percent = match self.last {
            Some((prev_ticks, at)) => {
                let wall = now.duration_since(at).as_secs_f64();
                if wall > 0.0 && self.ticks_per_second > 0.0 {
                    ticks.saturating_sub(prev_ticks) as f64 / self.ticks_per_second / wall * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last = Some((ticks, now));

        Some(ResourceSample {
            cpu_percent: cpu_percent as f32,
            memory_bytes: rss_pages * self.page_size,
        })
    }
}

fn usage_of(stat: &procfs::process::Stat) -> ProcUsage {
    ProcUsage {
        pid: stat.pid,
        ticks: stat.utime + stat.stime,
        rss_pages: stat.rss,
    }
}

/// Total (cpu ticks, rss pages) for `root` and its descendants.
fn tree_usage(root: i32) -> Option<(u64, u64)> {
    let root_stat = procfs::process::Process::new(root).ok()?.stat().ok()?;

    let mut children: HashMap<i32, Vec<ProcUsage>> = HashMap::new();
    if let Ok(all) = procfs::process::all_processes() {
        for proc in all.flatten() {
            // Process may have exited
            if let Ok(stat) = proc.stat() {
                children.entry(stat.ppid).or_default().push(usage_of(&stat));
            }
        }
    }

    let mut ticks = 0u64;
    let mut rss_pages = 0u64;
    let mut seen = HashSet::new();
    let mut stack = vec![usage_of(&root_stat)];
    while let Some(usage) = stack.pop() {
        if !seen.insert(usage.pid) {
            continue;
        }
        ticks += usage.ticks;
        rss_pages += usage.rss_pages;
        if let Some(kids) = children.remove(&usage.pid) {
            stack.extend(kids);
        }
    }
    Some((ticks, rss_pages))
}
