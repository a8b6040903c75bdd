#![warn(missing_docs)]

//! combfs management subsystem: maintenance-cycle tracking, query integrity
//! watermark, expansion control, admin API and CLI.

/// External alert channel with bounded history.
pub mod alerts;
/// Admin HTTP API.
pub mod api;
/// Command-line interface.
pub mod cli;
pub mod client;
/// Wall-clock sources.
pub mod clock;
/// Monitor configuration.
pub mod config;
pub mod expansion;
pub mod metrics;
pub mod monitor;
pub mod sample;
/// Server wiring for `combfs-mgmt serve`.
pub mod server;
pub mod store;
pub mod task;
pub mod tracker;
pub mod watermark;

#[cfg(test)]
mod testing;

pub use api::AdminApi;
pub use config::MonitorConfig;
pub use monitor::{ClusterMonitor, ClusterSnapshot, MonitorContext, MonitorHandle, MonitorSettings};
pub use sample::{CellSample, DiskCounters};
pub use task::TaskKind;
pub use tracker::{CycleTracker, TaskAggregate, TaskStats};
