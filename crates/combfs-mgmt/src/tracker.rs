//! Fleet-wide maintenance cycle tracking.
//!
//! Each [`TaskAggregate`] owns a grid of cells, one per (node slot, disk slot),
//! holding the most recent sample reported by the task runner on that disk.
//! A cycle is complete once every live cell has advanced its `cycles_done`
//! counter past the baseline captured at the start of the current generation.
//! Cells whose sample is [`CellSample::Unknown`] are invisible: they never
//! block completion and never contribute to statistics.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::sample::{CellSample, DiskCounters};
use crate::task::TaskKind;

/// Tracker input errors.
#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    /// The (node, disk) pair lies outside the grid.
    #[error("Slot out of range: node {node} disk {disk} (grid {nodes}x{disks})")]
    SlotOutOfRange {
        /// Requested node slot.
        node: usize,
        /// Requested disk slot.
        disk: usize,
        /// Grid node slots.
        nodes: usize,
        /// Grid disk slots.
        disks: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    sample: CellSample,
    /// `cycles_done` recorded when the current generation began for this cell.
    baseline: Option<u64>,
    last_seen: i64,
}

impl Cell {
    fn unknown() -> Self {
        Self {
            sample: CellSample::Unknown,
            baseline: None,
            last_seen: 0,
        }
    }

    fn live(&self) -> Option<(&DiskCounters, u64)> {
        match (&self.sample, self.baseline) {
            (CellSample::Live(c), Some(b)) => Some((c, b)),
            _ => None,
        }
    }
}

/// Read-only view of one cell, for status output and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellView {
    /// Latest sample.
    pub sample: CellSample,
    /// Baseline `cycles_done` of the current generation; `None` while unknown.
    pub generation_snapshot: Option<u64>,
    /// Time of the last live observation, epoch ms.
    pub last_seen: i64,
}

/// Published statistics of one task kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Task kind.
    pub task: TaskKind,
    /// Numeric id of the task kind.
    pub task_id: u32,
    /// Latest completion boundary, epoch ms.
    pub completion_time: i64,
    /// Completion boundary of the previous generation, epoch ms.
    pub previous_completion_time: i64,
    /// Longest per-disk cycle in the last generation, ms.
    pub slowest_disk_time: i64,
    /// Shortest per-disk cycle in the last generation, ms.
    pub fastest_disk_time: i64,
    /// Mean per-disk cycle in the last generation, ms.
    pub average_disk_time: i64,
    /// Faults reported by live cells at the last reset.
    pub error_count: u64,
    /// Mean progress of live cells; `None` with no live cells.
    pub completion_percent: Option<f64>,
    /// Earliest run start at the last reset, aggregator only.
    pub super_run_start: i64,
    /// Earliest cycle start at the last reset, aggregator only.
    pub super_cycle_start: i64,
    /// Closed generations.
    pub generation: u64,
    /// Cells currently live.
    pub live_cells: usize,
}

/// Per-task cycle state over the (node, disk) grid.
#[derive(Debug, Clone)]
pub struct TaskAggregate {
    kind: TaskKind,
    nodes: usize,
    disks: usize,
    cells: Vec<Cell>,
    completion_time: i64,
    previous_completion_time: i64,
    slowest_disk_time: i64,
    fastest_disk_time: i64,
    average_disk_time: i64,
    error_count: u64,
    super_run_start: i64,
    super_cycle_start: i64,
    generation: u64,
}

impl TaskAggregate {
    /// Aggregate with every cell unknown.
    pub fn new(kind: TaskKind, nodes: usize, disks: usize) -> Self {
        Self {
            kind,
            nodes,
            disks,
            cells: vec![Cell::unknown(); nodes * disks],
            completion_time: 0,
            previous_completion_time: 0,
            slowest_disk_time: 0,
            fastest_disk_time: 0,
            average_disk_time: 0,
            error_count: 0,
            super_run_start: 0,
            super_cycle_start: 0,
            generation: 0,
        }
    }

    fn index(&self, node: usize, disk: usize) -> Result<usize, TrackerError> {
        if node >= self.nodes || disk >= self.disks {
            return Err(TrackerError::SlotOutOfRange {
                node,
                disk,
                nodes: self.nodes,
                disks: self.disks,
            });
        }
        Ok(node * self.disks + disk)
    }

    /// Records the latest sample for one cell. Does not evaluate completion.
    ///
    /// The first live observation of a cell, initially or after it was
    /// unknown, fixes its baseline at the reported `cycles_done`. A counter
    /// that went backwards (runner restarted, disk replaced) is re-baselined.
    pub fn update_completion(
        &mut self,
        node: usize,
        disk: usize,
        sample: CellSample,
        now: i64,
    ) -> Result<(), TrackerError> {
        let idx = self.index(node, disk)?;
        let cell = &mut self.cells[idx];
        match sample {
            CellSample::Live(counters) => {
                match cell.baseline {
                    None => cell.baseline = Some(counters.cycles_done),
                    Some(b) if counters.cycles_done < b => {
                        debug!(
                            task = %self.kind,
                            node,
                            disk,
                            baseline = b,
                            cycles_done = counters.cycles_done,
                            "cycle counter went backwards, re-baselining cell"
                        );
                        cell.baseline = Some(counters.cycles_done);
                    }
                    Some(_) => {}
                }
                cell.last_seen = now;
            }
            CellSample::Unknown => cell.baseline = None,
        }
        cell.sample = sample;
        Ok(())
    }

    fn live_cells(&self) -> impl Iterator<Item = (&DiskCounters, u64)> + '_ {
        self.cells.iter().filter_map(Cell::live)
    }

    /// Number of live cells.
    pub fn live_cell_count(&self) -> usize {
        self.live_cells().count()
    }

    /// True iff at least one cell is live and every live cell has advanced
    /// past its generation baseline.
    pub fn is_complete(&self) -> bool {
        let mut any = false;
        for (counters, baseline) in self.live_cells() {
            if counters.cycles_done <= baseline {
                return false;
            }
            any = true;
        }
        any
    }

    /// Closes the current generation. Returns `false` and leaves all state
    /// untouched unless the aggregate is complete, so a repeated call within
    /// one generation is a no-op.
    pub fn reset(&mut self) -> bool {
        if !self.is_complete() {
            return false;
        }

        let live: Vec<DiskCounters> = self.live_cells().map(|(c, _)| *c).collect();

        self.previous_completion_time = self.completion_time;
        let last_finish = live
            .iter()
            .map(|c| c.current_cycle_start)
            .max()
            .unwrap_or(self.completion_time);
        self.completion_time = self.completion_time.max(last_finish);

        let durations: Vec<i64> = live
            .iter()
            .map(|c| self.completion_time.saturating_sub(c.cycle_start).max(0))
            .collect();
        if let (Some(&slowest), Some(&fastest)) = (durations.iter().max(), durations.iter().min()) {
            self.slowest_disk_time = slowest;
            self.fastest_disk_time = fastest;
            let total: i128 = durations.iter().map(|&d| d as i128).sum();
            self.average_disk_time = (total / durations.len() as i128) as i64;
        }

        self.error_count = live
            .iter()
            .fold(0u64, |acc, c| acc.saturating_add(c.fault_count));

        if self.kind.is_aggregator() {
            if let Some(run_start) = live.iter().map(|c| c.current_run_start).min() {
                self.super_run_start = run_start;
            }
            if let Some(cycle_start) = live.iter().map(|c| c.current_cycle_start).min() {
                self.super_cycle_start = cycle_start;
            }
        }

        for cell in self.cells.iter_mut() {
            if let (CellSample::Live(c), Some(_)) = (&cell.sample, cell.baseline) {
                cell.baseline = Some(c.cycles_done);
            }
        }
        self.generation += 1;

        info!(
            task = %self.kind,
            generation = self.generation,
            completion_time = self.completion_time,
            live_cells = live.len(),
            errors = self.error_count,
            "maintenance cycle complete"
        );
        true
    }

    /// Mean progress over live cells; display only.
    pub fn completion_percent(&self) -> Option<f64> {
        let pcts: Vec<f64> = self
            .live_cells()
            .map(|(c, _)| c.completion_pct as f64)
            .collect();
        if pcts.is_empty() {
            return None;
        }
        Some(pcts.iter().sum::<f64>() / pcts.len() as f64)
    }

    /// Forces downstream consumers keyed on the previous completion to treat
    /// themselves as stale.
    pub fn reset_previous_completed(&mut self) {
        self.previous_completion_time = 0;
    }

    /// Sum of the fault counters currently reported by live cells.
    pub fn live_fault_count(&self) -> u64 {
        self.live_cells()
            .fold(0u64, |acc, (c, _)| acc.saturating_add(c.fault_count))
    }

    /// View of one cell, or `None` out of range.
    pub fn cell(&self, node: usize, disk: usize) -> Option<CellView> {
        let idx = self.index(node, disk).ok()?;
        let cell = &self.cells[idx];
        Some(CellView {
            sample: cell.sample,
            generation_snapshot: cell.baseline,
            last_seen: cell.last_seen,
        })
    }

    /// Task kind.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Latest completion boundary.
    pub fn completion_time(&self) -> i64 {
        self.completion_time
    }

    /// Previous completion boundary.
    pub fn previous_completion_time(&self) -> i64 {
        self.previous_completion_time
    }

    /// Slowest per-disk cycle time.
    pub fn slowest_disk_time(&self) -> i64 {
        self.slowest_disk_time
    }

    /// Fastest per-disk cycle time.
    pub fn fastest_disk_time(&self) -> i64 {
        self.fastest_disk_time
    }

    /// Mean per-disk cycle time.
    pub fn average_disk_time(&self) -> i64 {
        self.average_disk_time
    }

    /// Faults at the last reset.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Aggregator run start.
    pub fn super_run_start(&self) -> i64 {
        self.super_run_start
    }

    /// Aggregator cycle start.
    pub fn super_cycle_start(&self) -> i64 {
        self.super_cycle_start
    }

    /// Closed generations.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Published statistics.
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            task: self.kind,
            task_id: self.kind.id(),
            completion_time: self.completion_time,
            previous_completion_time: self.previous_completion_time,
            slowest_disk_time: self.slowest_disk_time,
            fastest_disk_time: self.fastest_disk_time,
            average_disk_time: self.average_disk_time,
            error_count: self.error_count,
            completion_percent: self.completion_percent(),
            super_run_start: self.super_run_start,
            super_cycle_start: self.super_cycle_start,
            generation: self.generation,
            live_cells: self.live_cell_count(),
        }
    }
}

/// One [`TaskAggregate`] per registered task kind.
#[derive(Debug, Clone)]
pub struct CycleTracker {
    aggregates: Vec<TaskAggregate>,
}

impl CycleTracker {
    /// Tracker over a `nodes` by `disks` grid.
    pub fn new(nodes: usize, disks: usize) -> Self {
        Self {
            aggregates: TaskKind::ALL
                .iter()
                .map(|&kind| TaskAggregate::new(kind, nodes, disks))
                .collect(),
        }
    }

    /// Aggregate of `kind`.
    pub fn aggregate(&self, kind: TaskKind) -> &TaskAggregate {
        &self.aggregates[kind.id() as usize]
    }

    /// Mutable aggregate of `kind`.
    pub fn aggregate_mut(&mut self, kind: TaskKind) -> &mut TaskAggregate {
        &mut self.aggregates[kind.id() as usize]
    }

    /// Aggregates ordered by task id.
    pub fn iter(&self) -> impl Iterator<Item = &TaskAggregate> {
        self.aggregates.iter()
    }

    /// Mutable aggregates ordered by task id.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TaskAggregate> {
        self.aggregates.iter_mut()
    }

    /// Feeds one sample to the aggregate of `kind`.
    pub fn update_completion(
        &mut self,
        kind: TaskKind,
        node: usize,
        disk: usize,
        sample: CellSample,
        now: i64,
    ) -> Result<(), TrackerError> {
        self.aggregate_mut(kind).update_completion(node, disk, sample, now)
    }

    /// Statistics of every kind.
    pub fn stats(&self) -> Vec<TaskStats> {
        self.aggregates.iter().map(TaskAggregate::stats).collect()
    }
}
