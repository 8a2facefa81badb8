//! CPU accounting reads from the /proc filesystem.
//!
//! This module provides the raw counter sources for the utilization
//! calculator: the host scheduler tick constant, per-process task tick
//! sums, and the host-wide iowait counter. All counters are cumulative
//! jiffies; rates are derived elsewhere by delta over a sample window.

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::error::CollectError;

/// Zero-based field index of utime in /proc/<pid>/task/<tid>/stat.
const STAT_UTIME_FIELD: usize = 13;
/// Zero-based field index of stime in /proc/<pid>/task/<tid>/stat.
const STAT_STIME_FIELD: usize = 14;
/// Zero-based field index of iowait in the aggregate "cpu" row of /proc/stat.
const STAT_IOWAIT_FIELD: usize = 5;

/// Cumulative user/system tick counters summed across a process's tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskTicks {
    pub user: u64,
    pub system: u64,
}

/// Resolves the host scheduler ticks-per-second constant via sysconf.
///
/// Resolved once at startup; sampling is impossible without it, so a
/// missing or non-positive value is fatal.
pub fn clock_ticks_per_second() -> Result<u64, CollectError> {
    // Safety: sysconf has no memory-safety preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks <= 0 {
        return Err(CollectError::Configuration(format!(
            "sysconf(_SC_CLK_TCK) returned {}",
            ticks
        )));
    }
    Ok(ticks as u64)
}

/// Reader for process and host CPU accounting records.
///
/// The proc root is a field so tests can point it at a fixture tree
/// instead of the live /proc filesystem.
#[derive(Debug, Clone)]
pub struct ProcSampler {
    root: PathBuf,
}

impl Default for ProcSampler {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcSampler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Sums utime/stime across all tasks of `pid`.
    ///
    /// The task set may change between the two snapshots of a cycle; no
    /// attempt is made to pin membership. Tasks that vanish mid-scan are
    /// skipped silently. Only a structurally unreadable task directory
    /// (process gone entirely) is an error.
    pub fn task_ticks(&self, pid: u32) -> Result<TaskTicks, CollectError> {
        let task_dir = self.root.join(pid.to_string()).join("task");
        let entries = fs::read_dir(&task_dir).map_err(|e| {
            CollectError::Accounting(format!("cannot enumerate tasks of pid {}: {}", pid, e))
        })?;

        let mut total = TaskTicks::default();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let stat_path = entry.path().join("stat");
            let content = match fs::read_to_string(&stat_path) {
                Ok(c) => c,
                Err(e) => {
                    // Task exited between readdir and read; it simply stops
                    // contributing to the sum.
                    debug!("skipping task stat {}: {}", stat_path.display(), e);
                    continue;
                }
            };
            if let Some(ticks) = parse_task_stat(&content) {
                total.user += ticks.user;
                total.system += ticks.system;
            }
        }
        Ok(total)
    }

    /// Reads the host-wide cumulative iowait tick counter from the
    /// aggregate "cpu" row of /proc/stat.
    pub fn host_iowait_ticks(&self) -> Result<u64, CollectError> {
        let stat_path = self.root.join("stat");
        let content = fs::read_to_string(&stat_path).map_err(|e| {
            CollectError::Accounting(format!("cannot read {}: {}", stat_path.display(), e))
        })?;
        parse_host_iowait(&content).ok_or_else(|| {
            CollectError::Accounting(format!(
                "no aggregate cpu row with iowait field in {}",
                stat_path.display()
            ))
        })
    }
}

/// Extracts utime/stime from one task stat record.
///
/// The record is a single whitespace-delimited line; utime and stime sit
/// at fixed zero-based indices 13 and 14. Short or malformed records
/// yield None and are skipped by the caller.
fn parse_task_stat(content: &str) -> Option<TaskTicks> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() <= STAT_STIME_FIELD {
        return None;
    }
    let user = parts[STAT_UTIME_FIELD].parse::<u64>().ok()?;
    let system = parts[STAT_STIME_FIELD].parse::<u64>().ok()?;
    Some(TaskTicks { user, system })
}

/// Locates the aggregate "cpu" row and returns its iowait field.
fn parse_host_iowait(content: &str) -> Option<u64> {
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("cpu") {
            continue;
        }
        // iowait is the 5th value after the "cpu" marker (zero-based
        // field 5 of the full row).
        return fields.nth(STAT_IOWAIT_FIELD - 1)?.parse::<u64>().ok();
    }
    None
}
