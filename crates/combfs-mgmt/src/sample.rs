//! Per-disk task counters and cell samples.

use serde::{Deserialize, Serialize};

/// Counters reported by the task runner on one disk for one task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCounters {
    /// Monotonic count of cycles this disk has finished.
    pub cycles_done: u64,
    /// Progress through the current cycle, 0-100.
    pub completion_pct: u8,
    /// Cumulative fault counter kept by the runner.
    pub fault_count: u64,
    /// Start time (ms) of the most recently finished cycle.
    pub cycle_start: i64,
    /// Start time (ms) of the current task run.
    pub current_run_start: i64,
    /// Start time (ms) of the cycle now in progress.
    pub current_cycle_start: i64,
}

impl DiskCounters {
    /// Counters with zeroed times; `completion_pct` is clamped to 100.
    pub fn new(cycles_done: u64, completion_pct: u8) -> Self {
        Self {
            cycles_done,
            completion_pct: completion_pct.min(100),
            fault_count: 0,
            cycle_start: 0,
            current_run_start: 0,
            current_cycle_start: 0,
        }
    }

    /// Sets the fault counter.
    pub fn with_faults(mut self, fault_count: u64) -> Self {
        self.fault_count = fault_count;
        self
    }

    /// Sets the cycle and run start times.
    pub fn with_times(mut self, cycle_start: i64, current_run_start: i64, current_cycle_start: i64) -> Self {
        self.cycle_start = cycle_start;
        self.current_run_start = current_run_start;
        self.current_cycle_start = current_cycle_start;
        self
    }
}

/// Latest observation of one (node, disk, task) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum CellSample {
    /// The runner reported counters.
    Live(DiskCounters),
    /// Node or disk unreachable, dead, absent or disabled.
    Unknown,
}

impl CellSample {
    /// Whether the sample carries counters.
    pub fn is_live(&self) -> bool {
        matches!(self, CellSample::Live(_))
    }

    /// Counters of a live sample.
    pub fn counters(&self) -> Option<&DiskCounters> {
        match self {
            CellSample::Live(c) => Some(c),
            CellSample::Unknown => None,
        }
    }

    /// Converts a raw runner tuple, where any negative field marks an
    /// offline cell, into a sample.
    pub fn from_legacy(
        cycle_start: i64,
        completion_pct: i64,
        cycles_done: i64,
        fault_count: i64,
        current_run_start: i64,
        current_cycle_start: i64,
    ) -> Self {
        if cycles_done < 0 || completion_pct < 0 || fault_count < 0 {
            return CellSample::Unknown;
        }
        if cycle_start < 0 || current_run_start < 0 || current_cycle_start < 0 {
            return CellSample::Unknown;
        }
        CellSample::Live(DiskCounters {
            cycles_done: cycles_done as u64,
            completion_pct: completion_pct.min(100) as u8,
            fault_count: fault_count as u64,
            cycle_start,
            current_run_start,
            current_cycle_start,
        })
    }
}

impl From<DiskCounters> for CellSample {
    fn from(counters: DiskCounters) -> Self {
        CellSample::Live(counters)
    }
}
