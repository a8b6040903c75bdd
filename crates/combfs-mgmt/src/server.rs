use crate::alerts::AlertLog;
use crate::api::AdminApi;
use crate::client::HttpClusterClient;
use crate::clock::SystemClock;
use crate::config::MonitorConfig;
use crate::metrics::MonitorMetrics;
use crate::monitor::{ClusterMonitor, MonitorContext, MonitorSettings};
use crate::store::FileConfigStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Wires the production collaborators, then runs the monitor loop and the
/// admin API until Ctrl-C or until the API stops.
pub async fn run(config: MonitorConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let store = FileConfigStore::open(config.state_path.clone())?;
    tracing::info!("State store at {}", store.path().display());

    let ctx = MonitorContext {
        client: Arc::new(HttpClusterClient::new(
            config.cluster_endpoint.clone(),
            config.sample_timeout(),
        )),
        store: Arc::new(store),
        clock: Arc::new(SystemClock),
        alerts: Arc::new(AlertLog::new(config.alert_history)),
        metrics: MonitorMetrics::new(),
    };
    let monitor = ClusterMonitor::new(ctx, MonitorSettings::from(config.as_ref()));

    let shutdown = CancellationToken::new();
    let (handle, monitor_task) = monitor.spawn(shutdown.clone());
    let api = AdminApi::new(handle, config.clone());
    let mut api_task = tokio::spawn(api.serve(shutdown.clone()));

    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
            Ok(())
        }
        served = &mut api_task => match served {
            Ok(res) => res,
            Err(e) => Err(anyhow::anyhow!("Admin API task failed: {}", e)),
        },
    };

    shutdown.cancel();
    if let Err(e) = monitor_task.await {
        tracing::error!("Monitor task failed: {}", e);
    }
    if !api_task.is_finished() {
        if let Err(e) = api_task.await {
            tracing::error!("Admin API task failed: {}", e);
        }
    }
    result
}
