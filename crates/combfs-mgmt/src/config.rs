use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Monitor configuration, loaded from TOML or JSON. Missing keys take defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Admin API listen address.
    pub bind_addr: SocketAddr,
    /// Seconds between monitor passes.
    pub tick_interval_secs: u64,
    /// Per-request timeout for cluster queries, in ms.
    pub sample_timeout_ms: u64,
    /// Node slots in the tracker grid.
    pub max_cluster_size: usize,
    /// Disk slots per node.
    pub disks_per_node: usize,
    /// Node count before an expansion doubles the cluster.
    pub pre_expansion_nodes: usize,
    /// Cluster master base URL.
    pub cluster_endpoint: String,
    /// Path of the JSON state store.
    pub state_path: PathBuf,
    /// Bearer token for the admin API. `None` disables auth.
    pub admin_token: Option<String>,
    /// Log output format.
    pub log_format: LogFormat,
    /// External alerts kept in memory.
    pub alert_history: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
            tick_interval_secs: 5,
            sample_timeout_ms: 2000,
            max_cluster_size: 16,
            disks_per_node: 4,
            pre_expansion_nodes: 8,
            cluster_endpoint: String::from("http://127.0.0.1:8080"),
            state_path: PathBuf::from("/var/lib/combfs/mgmt-state.json"),
            admin_token: None,
            log_format: LogFormat::Text,
            alert_history: 256,
        }
    }
}

impl MonitorConfig {
    /// Loads a config file, picking the format from its extension, and validates it.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: MonitorConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero intervals or sizes and an expansion that would not fit.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be greater than zero");
        }
        if self.max_cluster_size == 0 || self.disks_per_node == 0 {
            anyhow::bail!("max_cluster_size and disks_per_node must be greater than zero");
        }
        if self.pre_expansion_nodes * 2 > self.max_cluster_size {
            anyhow::bail!(
                "pre_expansion_nodes ({}) doubled exceeds max_cluster_size ({})",
                self.pre_expansion_nodes,
                self.max_cluster_size
            );
        }
        Ok(())
    }

    /// Tick interval as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Sample timeout as a [`Duration`].
    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }
}
