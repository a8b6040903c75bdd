//! Durable capacity-expansion latch: `Ready -> Sloshing -> Done`.
//!
//! `start_expansion` authorizes doubling the cluster once the new upper half
//! is fully online. The expansion is confirmed when a lost-fragment recovery
//! cycle that began after the start has finished. There is no rollback and no
//! timeout; an expansion that never sees a qualifying cycle stays `Sloshing`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::client::{ClientError, ClusterClient, NodeInfo};
use crate::store::{
    ConfigStore, KEY_EXPANSION_DISK_MASK, KEY_EXPANSION_START_TIME, KEY_EXPANSION_STATE,
};

/// Expansion latch state. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionState {
    /// No expansion in progress.
    Ready,
    /// Data is being redistributed onto the new nodes.
    Sloshing,
    /// Recovery has completed after the expansion started.
    Done,
}

impl ExpansionState {
    /// Lowercase name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpansionState::Ready => "ready",
            ExpansionState::Sloshing => "sloshing",
            ExpansionState::Done => "done",
        }
    }

    /// Numeric form used by the metrics exporter.
    pub fn ordinal(&self) -> u8 {
        match self {
            ExpansionState::Ready => 0,
            ExpansionState::Sloshing => 1,
            ExpansionState::Done => 2,
        }
    }
}

impl fmt::Display for ExpansionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpansionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ready" => Ok(ExpansionState::Ready),
            "sloshing" => Ok(ExpansionState::Sloshing),
            "done" => Ok(ExpansionState::Done),
            other => Err(format!("unknown expansion state: {}", other)),
        }
    }
}

/// Reasons an expansion cannot start.
#[derive(Debug, Error, PartialEq)]
pub enum ExpansionError {
    /// The latch is no longer `Ready`.
    #[error("Expansion already started (state {0})")]
    AlreadyStarted(ExpansionState),
    /// Configured node count is not the pre-expansion size.
    #[error("Cluster has {actual} nodes, expansion requires exactly {expected}")]
    WrongNodeCount {
        /// Pre-expansion size.
        expected: usize,
        /// Configured size.
        actual: usize,
    },
    /// Cluster lacks quorum.
    #[error("Cluster does not have quorum")]
    NoQuorum,
    /// Cluster is in maintenance mode.
    #[error("Cluster is in maintenance mode")]
    MaintenanceMode,
    /// Listed membership is not twice the pre-expansion size.
    #[error("Cluster membership reports {actual} nodes, expected {expected}")]
    MembershipMismatch {
        /// Twice the pre-expansion size.
        expected: usize,
        /// Listed members.
        actual: usize,
    },
    /// A node in the upper half is not alive.
    #[error("Node in slot {0} is not alive")]
    NodeOffline(usize),
    /// A disk in the upper half is disabled.
    #[error("Disk {disk} on node slot {slot} is not enabled")]
    DiskDisabled {
        /// Node slot.
        slot: usize,
        /// Disk slot.
        disk: usize,
    },
    /// Gathering the preconditions failed.
    #[error("Cluster query failed: {0}")]
    Cluster(String),
    /// The monitor loop is gone.
    #[error("Monitor unavailable")]
    MonitorUnavailable,
}

impl From<ClientError> for ExpansionError {
    fn from(e: ClientError) -> Self {
        ExpansionError::Cluster(e.to_string())
    }
}

/// Per-slot disk enablement captured when the expansion starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskMask {
    /// Enabled bits per node slot, indexed by disk slot.
    pub nodes: BTreeMap<usize, Vec<bool>>,
}

impl DiskMask {
    /// Records which disks of `members` are alive and enabled.
    pub fn capture(members: &[NodeInfo], disks_per_node: usize) -> Self {
        let nodes = members
            .iter()
            .map(|n| {
                let bits = (0..disks_per_node).map(|d| n.alive && n.disk_enabled(d)).collect();
                (n.slot, bits)
            })
            .collect();
        Self { nodes }
    }

    /// Whether `disk` on `slot` was enabled when captured.
    #[cfg(test)]
    pub fn is_enabled(&self, slot: usize, disk: usize) -> bool {
        self.nodes
            .get(&slot)
            .and_then(|bits| bits.get(disk))
            .copied()
            .unwrap_or(false)
    }

    /// Number of enabled disks in the mask.
    pub fn enabled_count(&self) -> usize {
        self.nodes.values().flatten().filter(|&&b| b).count()
    }
}

/// Cluster facts checked before an expansion may begin.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionProbe {
    /// Node count the cluster is configured for.
    pub configured_nodes: usize,
    /// Whether the cluster has quorum.
    pub has_quorum: bool,
    /// Whether the cluster is in maintenance mode.
    pub maintenance_mode: bool,
    /// Listed cluster members.
    pub members: Vec<NodeInfo>,
}

impl ExpansionProbe {
    /// Reads every precondition from `client`.
    pub async fn gather(client: &dyn ClusterClient) -> Result<Self, ClientError> {
        Ok(Self {
            configured_nodes: client.configured_node_count().await?,
            has_quorum: client.has_quorum().await?,
            maintenance_mode: client.maintenance_mode().await?,
            members: client.list_nodes().await?,
        })
    }
}

/// Published expansion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionStatus {
    /// Latch state.
    pub state: ExpansionState,
    /// Time the expansion started, epoch ms; zero if never.
    pub start_time: i64,
    /// Disks the captured mask records as enabled; zero before any start.
    #[serde(default)]
    pub masked_disks: usize,
}

/// Owner of the expansion latch and its persisted copy.
#[derive(Debug, Clone)]
pub struct ExpansionMachine {
    state: ExpansionState,
    start_time: i64,
    disk_mask: Option<DiskMask>,
    pre_expansion_nodes: usize,
    disks_per_node: usize,
}

impl ExpansionMachine {
    /// Fresh latch in `Ready`.
    pub fn new(pre_expansion_nodes: usize, disks_per_node: usize) -> Self {
        Self {
            state: ExpansionState::Ready,
            start_time: 0,
            disk_mask: None,
            pre_expansion_nodes,
            disks_per_node,
        }
    }

    /// Restores the latch from `store`. A corrupt state is logged and read as `Ready`.
    pub fn load(store: &dyn ConfigStore, pre_expansion_nodes: usize, disks_per_node: usize) -> Self {
        let mut machine = Self::new(pre_expansion_nodes, disks_per_node);
        if let Some(raw) = store.get(KEY_EXPANSION_STATE) {
            match raw.parse() {
                Ok(state) => machine.state = state,
                Err(e) => error!(error = %e, "ignoring persisted expansion state"),
            }
        }
        machine.start_time = store.get_i64(KEY_EXPANSION_START_TIME).unwrap_or(0);
        machine.disk_mask = store
            .get(KEY_EXPANSION_DISK_MASK)
            .and_then(|raw| serde_json::from_str(&raw).ok());
        if machine.state != ExpansionState::Ready {
            info!(state = %machine.state, start_time = machine.start_time, "restored expansion state");
        }
        machine
    }

    /// Current state.
    pub fn state(&self) -> ExpansionState {
        self.state
    }

    /// Start time, epoch ms.
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Disk mask captured at start.
    pub fn disk_mask(&self) -> Option<&DiskMask> {
        self.disk_mask.as_ref()
    }

    /// Snapshot for readers.
    pub fn status(&self) -> ExpansionStatus {
        ExpansionStatus {
            state: self.state,
            start_time: self.start_time,
            masked_disks: self.disk_mask.as_ref().map(DiskMask::enabled_count).unwrap_or(0),
        }
    }

    fn check_preconditions(&self, probe: &ExpansionProbe) -> Result<(), ExpansionError> {
        if self.state != ExpansionState::Ready {
            return Err(ExpansionError::AlreadyStarted(self.state));
        }
        if probe.configured_nodes != self.pre_expansion_nodes {
            return Err(ExpansionError::WrongNodeCount {
                expected: self.pre_expansion_nodes,
                actual: probe.configured_nodes,
            });
        }
        if !probe.has_quorum {
            return Err(ExpansionError::NoQuorum);
        }
        if probe.maintenance_mode {
            return Err(ExpansionError::MaintenanceMode);
        }
        let expected_members = self.pre_expansion_nodes * 2;
        if probe.members.len() != expected_members {
            return Err(ExpansionError::MembershipMismatch {
                expected: expected_members,
                actual: probe.members.len(),
            });
        }
        for slot in self.pre_expansion_nodes..expected_members {
            let node = probe
                .members
                .iter()
                .find(|n| n.slot == slot)
                .filter(|n| n.alive)
                .ok_or(ExpansionError::NodeOffline(slot))?;
            if let Some(disk) = (0..self.disks_per_node).find(|&d| !node.disk_enabled(d)) {
                return Err(ExpansionError::DiskDisabled { slot, disk });
            }
        }
        Ok(())
    }

    /// `Ready -> Sloshing`. Rejected with no state change unless every
    /// precondition holds.
    pub fn start_expansion(
        &mut self,
        probe: &ExpansionProbe,
        now: i64,
        store: &dyn ConfigStore,
    ) -> Result<ExpansionStatus, ExpansionError> {
        if let Err(e) = self.check_preconditions(probe) {
            warn!(error = %e, "expansion rejected");
            return Err(e);
        }

        let mask = DiskMask::capture(&probe.members, self.disks_per_node);
        let mut batch = BTreeMap::new();
        batch.insert(
            KEY_EXPANSION_STATE.to_string(),
            ExpansionState::Sloshing.as_str().to_string(),
        );
        batch.insert(KEY_EXPANSION_START_TIME.to_string(), now.to_string());
        match serde_json::to_string(&mask) {
            Ok(json) => {
                batch.insert(KEY_EXPANSION_DISK_MASK.to_string(), json);
            }
            Err(e) => error!(error = %e, "failed to encode pre-expansion disk mask"),
        }

        self.state = ExpansionState::Sloshing;
        self.start_time = now;
        self.disk_mask = Some(mask);
        if let Err(e) = store.put_all(batch) {
            error!(error = %e, "failed to persist expansion start");
        }
        info!(
            start_time = now,
            nodes = self.pre_expansion_nodes * 2,
            "expansion started, cluster is sloshing"
        );
        Ok(self.status())
    }

    /// `Sloshing -> Done` once a recovery cycle completed after the start.
    /// Returns whether the state changed.
    pub fn check_expansion(&mut self, recovery_previous_completion: i64, store: &dyn ConfigStore) -> bool {
        if self.state != ExpansionState::Sloshing {
            return false;
        }
        if recovery_previous_completion <= self.start_time {
            return false;
        }

        self.state = ExpansionState::Done;
        if let Err(e) = store.put(KEY_EXPANSION_STATE, ExpansionState::Done.as_str()) {
            error!(error = %e, "failed to persist expansion completion");
        }
        info!(
            start_time = self.start_time,
            recovery_completed = recovery_previous_completion,
            "expansion done"
        );
        true
    }
}
