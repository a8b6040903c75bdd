//! Atomic metrics for the monitor and their Prometheus text rendering.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::tracker::TaskStats;

/// Shared `f64` value.
#[derive(Clone, Default)]
pub struct Gauge {
    value: Arc<AtomicU64>,
}

impl Gauge {
    /// Gauge at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value.
    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// Shared monotonically increasing count.
#[derive(Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `delta`.
    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current count.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

const TICK_BUCKETS_MS: &[u64] = &[10, 50, 100, 500, 1000, 5000, 10000];

/// Tick duration histogram in milliseconds.
#[derive(Clone)]
pub struct Histogram {
    buckets: Arc<Vec<AtomicU64>>,
    sum_ms: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    /// Empty histogram.
    pub fn new() -> Self {
        Self {
            buckets: Arc::new((0..=TICK_BUCKETS_MS.len()).map(|_| AtomicU64::new(0)).collect()),
            sum_ms: Arc::new(AtomicU64::new(0)),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records one observation.
    pub fn observe_ms(&self, value_ms: u64) {
        self.sum_ms.fetch_add(value_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let idx = TICK_BUCKETS_MS
            .iter()
            .position(|&b| value_ms <= b)
            .unwrap_or(TICK_BUCKETS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Observations at or below bucket `idx` (cumulative, Prometheus style).
    pub fn cumulative_count(&self, idx: usize) -> u64 {
        self.buckets
            .iter()
            .take(idx + 1)
            .map(|b| b.load(Ordering::Relaxed))
            .sum()
    }

    /// Sum of all observations.
    pub fn sum_ms(&self) -> u64 {
        self.sum_ms.load(Ordering::Relaxed)
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics of the monitor loop, cloned into every component that updates them.
#[derive(Clone, Default)]
pub struct MonitorMetrics {
    /// Monitor passes started.
    pub ticks_total: Counter,
    /// Passes skipped for lack of quorum.
    pub ticks_skipped_no_quorum: Counter,
    /// Cell samples that failed or timed out.
    pub sample_failures_total: Counter,
    /// Maintenance cycles closed.
    pub cycles_completed_total: Counter,
    /// Duration of each pass.
    pub tick_duration_ms: Histogram,
    /// Current query integrity watermark.
    pub query_integrity_time_ms: Gauge,
    /// Expansion state ordinal.
    pub expansion_state: Gauge,
}

impl MonitorMetrics {
    /// All metrics at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prometheus text exposition, including per-task series from `tasks`.
    pub fn render_prometheus(&self, tasks: &[TaskStats]) -> String {
        let mut out = String::new();

        counter(&mut out, "combfs_monitor_ticks_total", self.ticks_total.get());
        counter(
            &mut out,
            "combfs_monitor_ticks_skipped_no_quorum_total",
            self.ticks_skipped_no_quorum.get(),
        );
        counter(
            &mut out,
            "combfs_monitor_sample_failures_total",
            self.sample_failures_total.get(),
        );
        counter(
            &mut out,
            "combfs_monitor_cycles_completed_total",
            self.cycles_completed_total.get(),
        );

        out.push_str("# TYPE combfs_monitor_tick_duration_ms histogram\n");
        for (i, boundary) in TICK_BUCKETS_MS.iter().enumerate() {
            let _ = writeln!(
                out,
                "combfs_monitor_tick_duration_ms_bucket{{le=\"{}\"}} {}",
                boundary,
                self.tick_duration_ms.cumulative_count(i)
            );
        }
        let _ = writeln!(
            out,
            "combfs_monitor_tick_duration_ms_bucket{{le=\"+Inf\"}} {}",
            self.tick_duration_ms.count()
        );
        let _ = writeln!(out, "combfs_monitor_tick_duration_ms_sum {}", self.tick_duration_ms.sum_ms());
        let _ = writeln!(out, "combfs_monitor_tick_duration_ms_count {}\n", self.tick_duration_ms.count());

        gauge(&mut out, "combfs_query_integrity_time_ms", self.query_integrity_time_ms.get());
        gauge(&mut out, "combfs_expansion_state", self.expansion_state.get());

        out.push_str("# TYPE combfs_task_completion_time_ms gauge\n");
        for t in tasks {
            let _ = writeln!(
                out,
                "combfs_task_completion_time_ms{{task=\"{}\"}} {}",
                t.task, t.completion_time
            );
        }
        out.push_str("# TYPE combfs_task_completion_percent gauge\n");
        for t in tasks {
            if let Some(pct) = t.completion_percent {
                let _ = writeln!(out, "combfs_task_completion_percent{{task=\"{}\"}} {}", t.task, pct);
            }
        }
        out.push_str("# TYPE combfs_task_errors gauge\n");
        for t in tasks {
            let _ = writeln!(out, "combfs_task_errors{{task=\"{}\"}} {}", t.task, t.error_count);
        }
        out.push_str("# TYPE combfs_task_live_cells gauge\n");
        for t in tasks {
            let _ = writeln!(out, "combfs_task_live_cells{{task=\"{}\"}} {}", t.task, t.live_cells);
        }

        out
    }
}

fn counter(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {} counter\n{} {}\n", name, name, value);
}

fn gauge(out: &mut String, name: &str, value: f64) {
    let _ = writeln!(out, "# TYPE {} gauge\n{} {}\n", name, name, value);
}
