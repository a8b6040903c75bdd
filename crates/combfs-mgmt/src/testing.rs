use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::client::{ClientError, ClusterClient, DiskInfo, NodeInfo};
use crate::sample::CellSample;
use crate::task::TaskKind;

/// In-process cluster with scripted samples. Cells without a sample fail
/// like an absent disk.
pub struct FakeCluster {
    quorum: AtomicBool,
    maintenance: AtomicBool,
    nodes: Mutex<Vec<NodeInfo>>,
    samples: Mutex<HashMap<(usize, TaskKind, usize), CellSample>>,
    rebuild_time: Mutex<i64>,
}

impl FakeCluster {
    pub fn new(nodes: usize, disks: usize) -> Self {
        let nodes = (0..nodes)
            .map(|slot| NodeInfo {
                slot,
                node_id: 101 + slot as u32,
                addr: format!("n{}:8081", slot),
                alive: true,
                disks: (0..disks).map(|index| DiskInfo { index, enabled: true }).collect(),
            })
            .collect();
        Self {
            quorum: AtomicBool::new(true),
            maintenance: AtomicBool::new(false),
            nodes: Mutex::new(nodes),
            samples: Mutex::new(HashMap::new()),
            rebuild_time: Mutex::new(1),
        }
    }

    pub fn set_quorum(&self, quorum: bool) {
        self.quorum.store(quorum, Ordering::Relaxed);
    }

    pub fn set_cell(&self, slot: usize, task: TaskKind, disk: usize, sample: impl Into<CellSample>) {
        self.samples.lock().insert((slot, task, disk), sample.into());
    }

    pub fn set_all(&self, task: TaskKind, sample: impl Into<CellSample>) {
        let sample = sample.into();
        let nodes = self.nodes.lock().clone();
        let mut map = self.samples.lock();
        for n in nodes {
            for d in n.disks {
                map.insert((n.slot, task, d.index), sample);
            }
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn has_quorum(&self) -> Result<bool, ClientError> {
        Ok(self.quorum.load(Ordering::Relaxed))
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClientError> {
        Ok(self.nodes.lock().clone())
    }

    async fn node_task_sample(
        &self,
        node: &NodeInfo,
        task: TaskKind,
        disk: usize,
    ) -> Result<CellSample, ClientError> {
        self.samples
            .lock()
            .get(&(node.slot, task, disk))
            .copied()
            .ok_or(ClientError::DiskAbsent {
                node_id: node.node_id,
                disk,
            })
    }

    async fn metadata_rebuild_time(&self) -> Result<i64, ClientError> {
        Ok(*self.rebuild_time.lock())
    }

    async fn maintenance_mode(&self) -> Result<bool, ClientError> {
        Ok(self.maintenance.load(Ordering::Relaxed))
    }

    // Members are already doubled; the configuration still names the
    // pre-expansion size.
    async fn configured_node_count(&self) -> Result<usize, ClientError> {
        Ok(self.nodes.lock().len() / 2)
    }
}
