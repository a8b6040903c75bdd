//! Collaborator interfaces the monitor consumes from the rest of the cluster,
//! plus an HTTP/JSON adapter for them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::sample::CellSample;
use crate::task::TaskKind;

/// Failures talking to the cluster.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure or non-success status.
    #[error("HTTP error from {url}: {msg}")]
    Http {
        /// Requested URL.
        url: String,
        /// Error detail.
        msg: String,
    },
    /// Response body did not decode.
    #[error("Decode error from {url}: {msg}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Decoder error.
        msg: String,
    },
    /// Node has no reachable address.
    #[error("Node {0} unreachable")]
    Unreachable(u32),
    /// Disk slot is not present on the node.
    #[error("Disk {disk} absent on node {node_id}")]
    DiskAbsent {
        /// Node id.
        node_id: u32,
        /// Disk slot.
        disk: usize,
    },
    /// Request exceeded the client timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// One disk slot on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    /// Disk slot index.
    pub index: usize,
    /// Whether the disk is enabled for I/O.
    pub enabled: bool,
}

/// A cluster member as listed by the cluster master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Position in the cluster, `[0, max_cluster_size)`.
    pub slot: usize,
    /// Cluster-assigned node id.
    pub node_id: u32,
    /// `host:port` of the node's task runner.
    pub addr: String,
    /// Whether the master considers the node alive.
    pub alive: bool,
    /// Disk slots on the node.
    pub disks: Vec<DiskInfo>,
}

impl NodeInfo {
    /// Disk with slot `index`, if present.
    pub fn disk(&self, index: usize) -> Option<&DiskInfo> {
        self.disks.iter().find(|d| d.index == index)
    }

    /// Whether disk slot `index` exists and is enabled.
    pub fn disk_enabled(&self, index: usize) -> bool {
        self.disk(index).map(|d| d.enabled).unwrap_or(false)
    }
}

/// Cluster-side collaborators of the monitor.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Whether enough disks are online for cluster-wide results to be trusted.
    async fn has_quorum(&self) -> Result<bool, ClientError>;

    /// Every visible cluster member, at most `max_cluster_size` entries.
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClientError>;

    /// Latest counters of one task on one disk of `node`. Runners report an
    /// offline cell as a sentinel tuple, which comes back as
    /// [`CellSample::Unknown`] rather than an error.
    async fn node_task_sample(
        &self,
        node: &NodeInfo,
        task: TaskKind,
        disk: usize,
    ) -> Result<CellSample, ClientError>;

    /// Time of the last metadata store rebuild, epoch ms.
    async fn metadata_rebuild_time(&self) -> Result<i64, ClientError>;

    /// Whether the cluster is in maintenance mode.
    async fn maintenance_mode(&self) -> Result<bool, ClientError>;

    /// Node count the cluster is currently configured for.
    async fn configured_node_count(&self) -> Result<usize, ClientError>;
}

/// Runner payload for one (disk, task) cell. Any negative field marks the
/// cell offline.
#[derive(Debug, Deserialize)]
struct TaskCountersWire {
    cycle_start: i64,
    completion_pct: i64,
    cycles_done: i64,
    fault_count: i64,
    current_run_start: i64,
    current_cycle_start: i64,
}

impl From<TaskCountersWire> for CellSample {
    fn from(w: TaskCountersWire) -> Self {
        CellSample::from_legacy(
            w.cycle_start,
            w.completion_pct,
            w.cycles_done,
            w.fault_count,
            w.current_run_start,
            w.current_cycle_start,
        )
    }
}

#[derive(Debug, Deserialize)]
struct QuorumResponse {
    has_quorum: bool,
}

#[derive(Debug, Deserialize)]
struct RebuildResponse {
    last_rebuild_time: i64,
}

#[derive(Debug, Deserialize)]
struct MaintenanceResponse {
    maintenance_mode: bool,
}

#[derive(Debug, Deserialize)]
struct ClusterSizeResponse {
    num_nodes: usize,
}

/// Talks to the cluster master at `cluster_endpoint` and to each node's task
/// runner at `http://{node.addr}`.
pub struct HttpClusterClient {
    client: reqwest::Client,
    cluster_endpoint: String,
    timeout: Duration,
}

impl HttpClusterClient {
    /// Creates a client with a per-request `timeout`.
    pub fn new(cluster_endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            cluster_endpoint: cluster_endpoint.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, ClientError> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout(self.timeout)
                } else {
                    ClientError::Http {
                        url: url.clone(),
                        msg: e.to_string(),
                    }
                }
            })?;
        if !response.status().is_success() {
            return Err(ClientError::Http {
                url,
                msg: format!("HTTP {}", response.status()),
            });
        }
        response.json::<T>().await.map_err(|e| ClientError::Decode {
            url,
            msg: e.to_string(),
        })
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn has_quorum(&self) -> Result<bool, ClientError> {
        let url = format!("{}/api/v1/quorum", self.cluster_endpoint);
        Ok(self.get_json::<QuorumResponse>(url).await?.has_quorum)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClientError> {
        let url = format!("{}/api/v1/nodes", self.cluster_endpoint);
        self.get_json(url).await
    }

    async fn node_task_sample(
        &self,
        node: &NodeInfo,
        task: TaskKind,
        disk: usize,
    ) -> Result<CellSample, ClientError> {
        let url = format!(
            "http://{}/api/v1/disks/{}/tasks/{}",
            node.addr,
            disk,
            task.id()
        );
        Ok(self.get_json::<TaskCountersWire>(url).await?.into())
    }

    async fn metadata_rebuild_time(&self) -> Result<i64, ClientError> {
        let url = format!("{}/api/v1/metadata/rebuild-time", self.cluster_endpoint);
        Ok(self.get_json::<RebuildResponse>(url).await?.last_rebuild_time)
    }

    async fn maintenance_mode(&self) -> Result<bool, ClientError> {
        let url = format!("{}/api/v1/maintenance", self.cluster_endpoint);
        Ok(self.get_json::<MaintenanceResponse>(url).await?.maintenance_mode)
    }

    async fn configured_node_count(&self) -> Result<usize, ClientError> {
        let url = format!("{}/api/v1/cluster/size", self.cluster_endpoint);
        Ok(self.get_json::<ClusterSizeResponse>(url).await?.num_nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeInfo {
        NodeInfo {
            slot: 0,
            node_id: 101,
            addr: "10.0.0.1:8081".to_string(),
            alive: true,
            disks: vec![
                DiskInfo { index: 0, enabled: true },
                DiskInfo { index: 1, enabled: false },
            ],
        }
    }

    #[test]
    fn test_disk_lookup_by_index() {
        let n = node();
        assert!(n.disk_enabled(0));
        assert!(!n.disk_enabled(1));
        assert!(!n.disk_enabled(7));
        assert!(n.disk(7).is_none());
    }

    #[test]
    fn test_node_info_decodes_from_json() {
        let json = r#"{"slot":3,"node_id":104,"addr":"n4:8081","alive":false,
                       "disks":[{"index":0,"enabled":true}]}"#;
        let n: NodeInfo = serde_json::from_str(json).unwrap();
        assert_eq!(n.slot, 3);
        assert!(!n.alive);
        assert_eq!(n.disks.len(), 1);
    }

    #[test]
    fn test_http_client_trims_trailing_slash() {
        let c = HttpClusterClient::new("http://master:8080/", Duration::from_secs(1));
        assert_eq!(c.cluster_endpoint, "http://master:8080");
    }

    fn decode_sample(json: &str) -> CellSample {
        serde_json::from_str::<TaskCountersWire>(json).unwrap().into()
    }

    #[test]
    fn test_sentinel_payload_decodes_as_unknown() {
        let json = r#"{"cycle_start":-1,"completion_pct":-1,"cycles_done":-1,
                       "fault_count":-1,"current_run_start":-1,"current_cycle_start":-1}"#;
        assert_eq!(decode_sample(json), CellSample::Unknown);
    }

    #[test]
    fn test_partial_sentinel_timestamps_decode_as_unknown() {
        let json = r#"{"cycle_start":100,"completion_pct":40,"cycles_done":3,
                       "fault_count":0,"current_run_start":-1,"current_cycle_start":-1}"#;
        assert_eq!(decode_sample(json), CellSample::Unknown);
    }

    #[test]
    fn test_payload_completion_pct_is_clamped() {
        let json = r#"{"cycle_start":100,"completion_pct":200,"cycles_done":3,
                       "fault_count":1,"current_run_start":90,"current_cycle_start":120}"#;
        let sample = decode_sample(json);
        let counters = sample.counters().unwrap();
        assert_eq!(counters.completion_pct, 100);
        assert_eq!(counters.cycles_done, 3);
        assert_eq!(counters.fault_count, 1);
        assert_eq!(counters.current_cycle_start, 120);
    }

    #[tokio::test]
    async fn test_http_client_unreachable_is_error() {
        let c = HttpClusterClient::new("http://127.0.0.1:1", Duration::from_millis(200));
        assert!(c.has_quorum().await.is_err());
        assert!(c.node_task_sample(&node(), TaskKind::ScanFrags, 0).await.is_err());
    }
}
