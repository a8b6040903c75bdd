//! Cluster monitor loop.
//!
//! A single task owns the cycle tracker, the watermark and the expansion
//! latch. Every tick it gates on quorum, samples every (node, disk, task)
//! cell, feeds the tracker, closes completed cycles, recomputes the
//! watermark and advances the expansion. Readers get a [`ClusterSnapshot`]
//! through a `watch` channel and never block the loop; operator actions are
//! sent to the loop as [`MonitorCommand`]s.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::AlertLog;
use crate::client::{ClusterClient, NodeInfo};
use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::expansion::{ExpansionError, ExpansionMachine, ExpansionProbe, ExpansionState, ExpansionStatus};
use crate::metrics::MonitorMetrics;
use crate::sample::CellSample;
use crate::store::ConfigStore;
use crate::task::TaskKind;
use crate::tracker::{CycleTracker, TaskStats};
use crate::watermark::QueryIntegrityWatermark;

/// Errors reaching the monitor loop.
#[derive(Debug, Error, PartialEq)]
pub enum MonitorError {
    /// The loop has stopped.
    #[error("Monitor loop is not running")]
    Unavailable,
}

/// Collaborators the loop is built from.
#[derive(Clone)]
pub struct MonitorContext {
    /// Cluster queries.
    pub client: Arc<dyn ClusterClient>,
    /// Durable store for the watermark and the expansion latch.
    pub store: Arc<dyn ConfigStore>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// External alert channel.
    pub alerts: Arc<AlertLog>,
    /// Loop metrics.
    pub metrics: MonitorMetrics,
}

/// Loop tuning and grid size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Node slots in the grid.
    pub max_cluster_size: usize,
    /// Disk slots per node.
    pub disks_per_node: usize,
    /// Node count before an expansion.
    pub pre_expansion_nodes: usize,
    /// Time between passes.
    pub tick_interval: Duration,
    /// Timeout applied to every cluster query.
    pub sample_timeout: Duration,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            max_cluster_size: config.max_cluster_size,
            disks_per_node: config.disks_per_node,
            pre_expansion_nodes: config.pre_expansion_nodes,
            tick_interval: config.tick_interval(),
            sample_timeout: config.sample_timeout(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

/// What readers see of the monitor after each pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Statistics per task kind.
    pub tasks: Vec<TaskStats>,
    /// Live watermark.
    pub query_integrity_time: i64,
    /// Persisted watermark.
    pub saved_query_integrity_time: i64,
    /// Expansion latch status.
    pub expansion: ExpansionStatus,
    /// Whether the latest pass had quorum.
    pub has_quorum: bool,
    /// Passes run so far.
    pub ticks: u64,
    /// Time of the latest pass, epoch ms.
    pub last_tick_at: i64,
}

impl ClusterSnapshot {
    /// Statistics of `kind`.
    pub fn task(&self, kind: TaskKind) -> Option<&TaskStats> {
        self.tasks.iter().find(|t| t.task == kind)
    }
}

/// Result of one monitor pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Quorum was missing and nothing was sampled.
    SkippedNoQuorum,
    /// The pass ran.
    Completed {
        /// Task kinds whose cycle closed during the pass.
        cycles_closed: Vec<TaskKind>,
    },
}

/// Operator actions executed inside the loop.
pub enum MonitorCommand {
    /// Start the cluster expansion.
    StartExpansion {
        /// Receives the outcome.
        reply: oneshot::Sender<Result<ExpansionStatus, ExpansionError>>,
    },
    /// Clear the sys-cache task's previous completion time.
    ResetSysCache {
        /// Receives the updated statistics.
        reply: oneshot::Sender<TaskStats>,
    },
}

/// The monitor loop. Owns all tracking state.
pub struct ClusterMonitor {
    ctx: MonitorContext,
    settings: MonitorSettings,
    tracker: CycleTracker,
    watermark: QueryIntegrityWatermark,
    expansion: ExpansionMachine,
    quorum_lost_logged: bool,
    has_quorum: bool,
    ticks: u64,
    last_tick_at: i64,
    snapshot_tx: watch::Sender<ClusterSnapshot>,
}

impl ClusterMonitor {
    /// Builds the monitor, restoring persisted state from `ctx.store`.
    pub fn new(ctx: MonitorContext, settings: MonitorSettings) -> Self {
        let tracker = CycleTracker::new(settings.max_cluster_size, settings.disks_per_node);
        let watermark = QueryIntegrityWatermark::load(ctx.store.as_ref());
        let expansion = ExpansionMachine::load(
            ctx.store.as_ref(),
            settings.pre_expansion_nodes,
            settings.disks_per_node,
        );
        let (snapshot_tx, _) = watch::channel(ClusterSnapshot {
            tasks: tracker.stats(),
            query_integrity_time: watermark.query_integrity_time(),
            saved_query_integrity_time: watermark.saved_query_integrity_time(),
            expansion: expansion.status(),
            has_quorum: false,
            ticks: 0,
            last_tick_at: 0,
        });
        ctx.metrics
            .expansion_state
            .set(expansion.state().ordinal() as f64);
        Self {
            ctx,
            settings,
            tracker,
            watermark,
            expansion,
            quorum_lost_logged: false,
            has_quorum: false,
            ticks: 0,
            last_tick_at: 0,
            snapshot_tx,
        }
    }

    /// Receives a snapshot after every pass.
    pub fn subscribe(&self) -> watch::Receiver<ClusterSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Cycle tracker.
    pub fn tracker(&self) -> &CycleTracker {
        &self.tracker
    }

    /// Live watermark.
    pub fn query_integrity_time(&self) -> i64 {
        self.watermark.query_integrity_time()
    }

    /// Expansion status.
    pub fn expansion_status(&self) -> ExpansionStatus {
        self.expansion.status()
    }

    /// Snapshot of the current state.
    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            tasks: self.tracker.stats(),
            query_integrity_time: self.watermark.query_integrity_time(),
            saved_query_integrity_time: self.watermark.saved_query_integrity_time(),
            expansion: self.expansion.status(),
            has_quorum: self.has_quorum,
            ticks: self.ticks,
            last_tick_at: self.last_tick_at,
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// Runs one monitor pass. Never fails: every collaborator error degrades
    /// to unknown data or a skipped step.
    pub async fn tick(&mut self) -> TickOutcome {
        let started = Instant::now();
        let now = self.ctx.clock.now_ms();
        self.ticks += 1;
        self.last_tick_at = now;
        self.ctx.metrics.ticks_total.inc();

        let outcome = if self.check_quorum().await {
            self.ingest_samples(now).await;
            let cycles_closed = self.sweep_completions(now);
            self.recompute_watermark().await;
            self.check_expansion();
            TickOutcome::Completed { cycles_closed }
        } else {
            self.ctx.metrics.ticks_skipped_no_quorum.inc();
            TickOutcome::SkippedNoQuorum
        };

        self.ctx
            .metrics
            .tick_duration_ms
            .observe_ms(started.elapsed().as_millis() as u64);
        self.publish();
        outcome
    }

    async fn check_quorum(&mut self) -> bool {
        let quorum = match timeout(self.settings.sample_timeout, self.ctx.client.has_quorum()).await {
            Ok(Ok(q)) => q,
            Ok(Err(e)) => {
                debug!(error = %e, "quorum query failed");
                false
            }
            Err(_) => {
                debug!("quorum query timed out");
                false
            }
        };

        if quorum {
            if self.quorum_lost_logged {
                info!("cluster quorum restored, resuming monitor passes");
                self.quorum_lost_logged = false;
            }
        } else if !self.quorum_lost_logged {
            warn!("cluster has no disk quorum, skipping monitor passes");
            self.quorum_lost_logged = true;
        }
        self.has_quorum = quorum;
        quorum
    }

    async fn ingest_samples(&mut self, now: i64) {
        let samples = self.sample_cells().await;
        let live = samples.iter().filter(|(_, _, _, s)| s.is_live()).count();
        debug!(live, total = samples.len(), "sampled cells");
        for (task, slot, disk, sample) in samples {
            if let Err(e) = self.tracker.update_completion(task, slot, disk, sample, now) {
                warn!(task = %task, error = %e, "dropping sample");
            }
        }
    }

    async fn sample_cells(&self) -> Vec<(TaskKind, usize, usize, CellSample)> {
        let nodes = match timeout(self.settings.sample_timeout, self.ctx.client.list_nodes()).await {
            Ok(Ok(nodes)) => nodes,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to list cluster nodes, treating all cells as unknown");
                Vec::new()
            }
            Err(_) => {
                warn!("listing cluster nodes timed out, treating all cells as unknown");
                Vec::new()
            }
        };
        let by_slot: HashMap<usize, &NodeInfo> = nodes
            .iter()
            .filter(|n| n.slot < self.settings.max_cluster_size)
            .map(|n| (n.slot, n))
            .collect();

        let mut samples = Vec::new();
        let mut pending = Vec::new();
        for slot in 0..self.settings.max_cluster_size {
            for disk in 0..self.settings.disks_per_node {
                let node = by_slot
                    .get(&slot)
                    .copied()
                    .filter(|n| n.alive && n.disk_enabled(disk));
                for task in TaskKind::ALL {
                    match node {
                        Some(node) => pending.push(self.sample_cell(node, task, slot, disk)),
                        None => samples.push((task, slot, disk, CellSample::Unknown)),
                    }
                }
            }
        }
        samples.extend(join_all(pending).await);
        samples
    }

    async fn sample_cell(
        &self,
        node: &NodeInfo,
        task: TaskKind,
        slot: usize,
        disk: usize,
    ) -> (TaskKind, usize, usize, CellSample) {
        let request = self.ctx.client.node_task_sample(node, task, disk);
        let sample = match timeout(self.settings.sample_timeout, request).await {
            Ok(Ok(sample)) => sample,
            Ok(Err(e)) => {
                self.ctx.metrics.sample_failures_total.inc();
                debug!(task = %task, node = slot, disk, error = %e, "sample failed");
                CellSample::Unknown
            }
            Err(_) => {
                self.ctx.metrics.sample_failures_total.inc();
                debug!(task = %task, node = slot, disk, "sample timed out");
                CellSample::Unknown
            }
        };
        (task, slot, disk, sample)
    }

    fn sweep_completions(&mut self, now: i64) -> Vec<TaskKind> {
        let mut closed = Vec::new();
        for agg in self.tracker.iter_mut() {
            if !agg.is_complete() {
                continue;
            }
            let faults = agg.live_fault_count();
            if faults > 0 {
                self.ctx.alerts.warning(
                    format!("{} cycle completed with {} faults", agg.kind(), faults),
                    now,
                );
            }
            if agg.reset() {
                closed.push(agg.kind());
            }
        }
        self.ctx
            .metrics
            .cycles_completed_total
            .add(closed.len() as u64);
        closed
    }

    async fn recompute_watermark(&mut self) {
        let rebuild = timeout(
            self.settings.sample_timeout,
            self.ctx.client.metadata_rebuild_time(),
        )
        .await;
        let metadata_rebuild_time = match rebuild {
            Ok(Ok(t)) => t,
            Ok(Err(e)) => {
                warn!(error = %e, "metadata rebuild time unavailable, keeping watermark");
                return;
            }
            Err(_) => {
                warn!("metadata rebuild time query timed out, keeping watermark");
                return;
            }
        };

        let aggregator = self.tracker.aggregate(TaskKind::AGGREGATOR);
        let qit = self.watermark.recompute(
            aggregator.super_run_start(),
            aggregator.super_cycle_start(),
            metadata_rebuild_time,
            self.ctx.store.as_ref(),
        );
        self.ctx.metrics.query_integrity_time_ms.set(qit as f64);
    }

    fn check_expansion(&mut self) {
        if self.expansion.state() != ExpansionState::Sloshing {
            return;
        }
        let recovered = self
            .tracker
            .aggregate(TaskKind::RECOVERY)
            .previous_completion_time();
        if self.expansion.check_expansion(recovered, self.ctx.store.as_ref()) {
            self.ctx
                .metrics
                .expansion_state
                .set(self.expansion.state().ordinal() as f64);
        }
    }

    /// Checks the preconditions and starts the expansion.
    pub async fn start_expansion(&mut self) -> Result<ExpansionStatus, ExpansionError> {
        let probe = timeout(
            self.settings.sample_timeout * 4,
            ExpansionProbe::gather(self.ctx.client.as_ref()),
        )
        .await
        .map_err(|_| ExpansionError::Cluster("precondition queries timed out".to_string()))??;

        let now = self.ctx.clock.now_ms();
        let status = self
            .expansion
            .start_expansion(&probe, now, self.ctx.store.as_ref())?;
        self.ctx
            .metrics
            .expansion_state
            .set(status.state.ordinal() as f64);
        self.publish();
        Ok(status)
    }

    /// Forces the sys-cache consumers to treat themselves as stale.
    pub fn reset_sys_cache(&mut self) -> TaskStats {
        let agg = self.tracker.aggregate_mut(TaskKind::SYS_CACHE);
        agg.reset_previous_completed();
        info!(task = %agg.kind(), "previous completion reset by operator");
        let stats = agg.stats();
        self.publish();
        stats
    }

    async fn handle(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::StartExpansion { reply } => {
                let _ = reply.send(self.start_expansion().await);
            }
            MonitorCommand::ResetSysCache { reply } => {
                let _ = reply.send(self.reset_sys_cache());
            }
        }
    }

    /// Runs passes every tick and serves `commands` until `shutdown` is cancelled.
    pub async fn run(mut self, mut commands: mpsc::Receiver<MonitorCommand>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.settings.tick_interval.as_millis() as u64,
            nodes = self.settings.max_cluster_size,
            disks = self.settings.disks_per_node,
            "cluster monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
                Some(command) = commands.recv() => self.handle(command).await,
            }
        }
        info!(ticks = self.ticks, "cluster monitor stopped");
    }

    /// Spawns [`ClusterMonitor::run`] and returns a handle to it.
    pub fn spawn(self, shutdown: CancellationToken) -> (MonitorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let handle = MonitorHandle {
            commands: tx,
            snapshot: self.subscribe(),
            alerts: self.ctx.alerts.clone(),
            metrics: self.ctx.metrics.clone(),
        };
        let join = tokio::spawn(self.run(rx, shutdown));
        (handle, join)
    }
}

/// Cheap, cloneable read/command access to a running monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<MonitorCommand>,
    snapshot: watch::Receiver<ClusterSnapshot>,
    alerts: Arc<AlertLog>,
    metrics: MonitorMetrics,
}

impl MonitorHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> ClusterSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Statistics of `kind` from the latest snapshot.
    pub fn task_stats(&self, kind: TaskKind) -> Option<TaskStats> {
        self.snapshot.borrow().task(kind).cloned()
    }

    /// Live watermark from the latest snapshot.
    pub fn query_integrity_time(&self) -> i64 {
        self.snapshot.borrow().query_integrity_time
    }

    /// Expansion status from the latest snapshot.
    pub fn expansion_status(&self) -> ExpansionStatus {
        self.snapshot.borrow().expansion
    }

    /// True once the latest pass ran with quorum.
    pub fn is_ready(&self) -> bool {
        let snapshot = self.snapshot.borrow();
        snapshot.ticks > 0 && snapshot.has_quorum
    }

    /// External alert channel.
    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }

    /// Loop metrics.
    pub fn metrics(&self) -> &MonitorMetrics {
        &self.metrics
    }

    /// Starts the expansion inside the loop.
    pub async fn start_expansion(&self) -> Result<ExpansionStatus, ExpansionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(MonitorCommand::StartExpansion { reply })
            .await
            .map_err(|_| ExpansionError::MonitorUnavailable)?;
        rx.await.map_err(|_| ExpansionError::MonitorUnavailable)?
    }

    /// Resets the sys-cache previous completion inside the loop.
    pub async fn reset_sys_cache(&self) -> Result<TaskStats, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(MonitorCommand::ResetSysCache { reply })
            .await
            .map_err(|_| MonitorError::Unavailable)?;
        rx.await.map_err(|_| MonitorError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sample::DiskCounters;
    use crate::store::MemoryConfigStore;
    use crate::testing::FakeCluster;

    fn monitor(cluster: Arc<FakeCluster>, nodes: usize, disks: usize) -> ClusterMonitor {
        let ctx = MonitorContext {
            client: cluster,
            store: Arc::new(MemoryConfigStore::new()),
            clock: Arc::new(ManualClock::new(1_000)),
            alerts: Arc::new(AlertLog::new(16)),
            metrics: MonitorMetrics::new(),
        };
        let settings = MonitorSettings {
            max_cluster_size: nodes,
            disks_per_node: disks,
            pre_expansion_nodes: nodes / 2,
            tick_interval: Duration::from_millis(10),
            sample_timeout: Duration::from_millis(200),
        };
        ClusterMonitor::new(ctx, settings)
    }

    #[tokio::test]
    async fn test_no_quorum_skips_tick() {
        let cluster = Arc::new(FakeCluster::new(2, 1));
        cluster.set_quorum(false);
        cluster.set_all(TaskKind::ScanFrags, DiskCounters::new(1, 0));
        let mut m = monitor(cluster, 2, 1);

        assert_eq!(m.tick().await, TickOutcome::SkippedNoQuorum);
        assert_eq!(m.tracker().aggregate(TaskKind::ScanFrags).live_cell_count(), 0);
        assert!(!m.snapshot().has_quorum);
        assert_eq!(m.snapshot().ticks, 1);
    }

    #[tokio::test]
    async fn test_missing_counters_degrade_to_unknown() {
        let cluster = Arc::new(FakeCluster::new(2, 2));
        cluster.set_cell(0, TaskKind::ScanFrags, 0, DiskCounters::new(1, 0));
        let mut m = monitor(cluster, 2, 2);

        assert!(matches!(m.tick().await, TickOutcome::Completed { .. }));
        assert_eq!(m.tracker().aggregate(TaskKind::ScanFrags).live_cell_count(), 1);
        assert!(m.ctx.metrics.sample_failures_total.get() > 0);
    }

    #[tokio::test]
    async fn test_quorum_loss_is_logged_once_until_restored() {
        let cluster = Arc::new(FakeCluster::new(2, 1));
        cluster.set_quorum(false);
        let mut m = monitor(cluster.clone(), 2, 1);
        assert!(!m.quorum_lost_logged);

        for _ in 0..3 {
            assert_eq!(m.tick().await, TickOutcome::SkippedNoQuorum);
            assert!(m.quorum_lost_logged);
        }
        assert_eq!(m.ctx.metrics.ticks_skipped_no_quorum.get(), 3);

        cluster.set_quorum(true);
        assert!(matches!(m.tick().await, TickOutcome::Completed { .. }));
        assert!(!m.quorum_lost_logged);

        cluster.set_quorum(false);
        assert_eq!(m.tick().await, TickOutcome::SkippedNoQuorum);
        assert!(m.quorum_lost_logged);
    }

    #[tokio::test]
    async fn test_sentinel_sample_is_unknown_not_a_failure() {
        let cluster = Arc::new(FakeCluster::new(1, 2));
        cluster.set_cell(0, TaskKind::ScanFrags, 0, DiskCounters::new(1, 0));
        cluster.set_cell(0, TaskKind::ScanFrags, 1, CellSample::from_legacy(-1, -1, -1, -1, -1, -1));
        for task in TaskKind::ALL {
            if task != TaskKind::ScanFrags {
                cluster.set_all(task, CellSample::Unknown);
            }
        }
        let mut m = monitor(cluster, 1, 2);

        assert!(matches!(m.tick().await, TickOutcome::Completed { .. }));
        let agg = m.tracker().aggregate(TaskKind::ScanFrags);
        assert_eq!(agg.live_cell_count(), 1);
        assert_eq!(agg.cell(0, 1).unwrap().sample, CellSample::Unknown);
        assert_eq!(m.ctx.metrics.sample_failures_total.get(), 0);
    }

    #[tokio::test]
    async fn test_completed_cycle_is_closed_and_faults_alerted() {
        let cluster = Arc::new(FakeCluster::new(2, 1));
        cluster.set_all(TaskKind::ScanFrags, DiskCounters::new(1, 0));
        let mut m = monitor(cluster.clone(), 2, 1);
        m.tick().await;

        cluster.set_all(
            TaskKind::ScanFrags,
            DiskCounters::new(2, 0).with_times(100, 100, 500).with_faults(2),
        );
        let outcome = m.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Completed {
                cycles_closed: vec![TaskKind::ScanFrags]
            }
        );
        let agg = m.tracker().aggregate(TaskKind::ScanFrags);
        assert_eq!(agg.completion_time(), 500);
        assert_eq!(agg.error_count(), 4);
        assert_eq!(m.ctx.metrics.cycles_completed_total.get(), 1);
        let alerts = m.ctx.alerts.recent();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].message.contains("scan-frags"));
        assert!(alerts[0].message.contains("4 faults"));

        assert_eq!(
            m.tick().await,
            TickOutcome::Completed {
                cycles_closed: vec![]
            }
        );
    }

    #[tokio::test]
    async fn test_reset_sys_cache_clears_previous_completion() {
        let cluster = Arc::new(FakeCluster::new(1, 1));
        let mut m = monitor(cluster.clone(), 1, 1);
        for cycles in 1..=3 {
            cluster.set_all(
                TaskKind::PopulateSysCache,
                DiskCounters::new(cycles, 0).with_times(0, 0, cycles as i64 * 100),
            );
            m.tick().await;
        }
        assert_eq!(
            m.tracker()
                .aggregate(TaskKind::PopulateSysCache)
                .previous_completion_time(),
            200
        );
        let stats = m.reset_sys_cache();
        assert_eq!(stats.previous_completion_time, 0);
        assert_eq!(stats.completion_time, 300);
    }

    #[tokio::test]
    async fn test_snapshot_is_published_to_subscribers() {
        let cluster = Arc::new(FakeCluster::new(1, 1));
        let mut m = monitor(cluster, 1, 1);
        let rx = m.subscribe();
        assert_eq!(rx.borrow().ticks, 0);
        m.tick().await;
        assert_eq!(rx.borrow().ticks, 1);
        assert!(rx.borrow().has_quorum);
        assert_eq!(rx.borrow().last_tick_at, 1_000);
    }

    #[tokio::test]
    async fn test_spawned_loop_answers_commands_and_stops() {
        let cluster = Arc::new(FakeCluster::new(2, 1));
        let m = monitor(cluster, 2, 1);
        let shutdown = CancellationToken::new();
        let (handle, join) = m.spawn(shutdown.clone());

        let stats = handle.reset_sys_cache().await.unwrap();
        assert_eq!(stats.task, TaskKind::PopulateSysCache);

        let status = handle.start_expansion().await.unwrap();
        assert_eq!(status.state, ExpansionState::Sloshing);
        assert_eq!(handle.expansion_status().state, ExpansionState::Sloshing);

        shutdown.cancel();
        join.await.unwrap();
        assert_eq!(
            handle.reset_sys_cache().await,
            Err(MonitorError::Unavailable)
        );
    }
}
