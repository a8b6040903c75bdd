use crate::alerts::Alert;
use crate::config::MonitorConfig;
use crate::expansion::{ExpansionError, ExpansionStatus};
use crate::monitor::MonitorHandle;
use crate::task::TaskKind;
use crate::tracker::TaskStats;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Response of `GET /api/v1/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Whether the monitor is ready to serve results.
    pub ready: bool,
    /// Whether the last pass had quorum.
    pub has_quorum: bool,
    /// Monitor passes run so far.
    pub ticks: u64,
    /// Time of the last pass, epoch ms.
    pub last_tick_at: i64,
    /// Current query integrity watermark.
    pub query_integrity_time: i64,
    /// Expansion latch status.
    pub expansion: ExpansionStatus,
}

/// Response of `GET /api/v1/watermark`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkView {
    /// Live watermark.
    pub query_integrity_time: i64,
    /// Persisted watermark.
    pub saved_query_integrity_time: i64,
}

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error message.
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn expansion_error_status(err: &ExpansionError) -> StatusCode {
    match err {
        ExpansionError::Cluster(_) => StatusCode::BAD_GATEWAY,
        ExpansionError::MonitorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::CONFLICT,
    }
}

/// Admin API over a running monitor.
pub struct AdminApi {
    monitor: MonitorHandle,
    config: Arc<MonitorConfig>,
}

impl AdminApi {
    /// Creates the API for `monitor` using the bind address and token in `config`.
    pub fn new(monitor: MonitorHandle, config: Arc<MonitorConfig>) -> Self {
        Self { monitor, config }
    }

    /// Builds the router. Everything except `/health` and `/ready` requires the
    /// admin bearer token when one is configured.
    pub fn router(self: Arc<Self>) -> Router {
        if self.config.admin_token.is_none() {
            tracing::warn!("admin API is running without authentication, set admin_token in config");
        }

        let protected = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/api/v1/status", get(status_handler))
            .route("/api/v1/tasks", get(tasks_handler))
            .route("/api/v1/tasks/:task", get(task_handler))
            .route("/api/v1/watermark", get(watermark_handler))
            .route("/api/v1/sys-cache/reset", post(reset_sys_cache_handler))
            .route("/api/v1/expansion", get(expansion_handler))
            .route("/api/v1/expansion/start", post(start_expansion_handler))
            .route("/api/v1/alerts", get(alerts_handler))
            .layer(axum::middleware::from_fn_with_state(
                self.clone(),
                auth_middleware,
            ));

        let public = Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler));

        Router::new()
            .merge(protected)
            .merge(public)
            .layer(axum::middleware::from_fn(security_headers_middleware))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Serves the API until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr = self.config.bind_addr;
        let router = Arc::new(self).router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Admin API listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler(State(state): State<Arc<AdminApi>>) -> Response {
    if state.monitor.is_ready() {
        Json(serde_json::json!({ "status": "ok" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "starting" })),
        )
            .into_response()
    }
}

async fn metrics_handler(State(state): State<Arc<AdminApi>>) -> (StatusCode, String) {
    let snapshot = state.monitor.snapshot();
    let output = state.monitor.metrics().render_prometheus(&snapshot.tasks);
    (StatusCode::OK, output)
}

async fn status_handler(State(state): State<Arc<AdminApi>>) -> Json<StatusSummary> {
    let ready = state.monitor.is_ready();
    let snapshot = state.monitor.snapshot();
    Json(StatusSummary {
        ready,
        has_quorum: snapshot.has_quorum,
        ticks: snapshot.ticks,
        last_tick_at: snapshot.last_tick_at,
        query_integrity_time: snapshot.query_integrity_time,
        expansion: snapshot.expansion,
    })
}

async fn tasks_handler(State(state): State<Arc<AdminApi>>) -> Json<Vec<TaskStats>> {
    Json(state.monitor.snapshot().tasks)
}

async fn task_handler(State(state): State<Arc<AdminApi>>, Path(task): Path<String>) -> Response {
    let kind: TaskKind = match task.parse() {
        Ok(kind) => kind,
        Err(e) => return error_response(StatusCode::NOT_FOUND, e.to_string()),
    };
    match state.monitor.task_stats(kind) {
        Some(stats) => Json(stats).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("no statistics for {}", kind)),
    }
}

async fn watermark_handler(State(state): State<Arc<AdminApi>>) -> Json<WatermarkView> {
    let snapshot = state.monitor.snapshot();
    Json(WatermarkView {
        query_integrity_time: snapshot.query_integrity_time,
        saved_query_integrity_time: snapshot.saved_query_integrity_time,
    })
}

async fn reset_sys_cache_handler(State(state): State<Arc<AdminApi>>) -> Response {
    match state.monitor.reset_sys_cache().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn expansion_handler(State(state): State<Arc<AdminApi>>) -> Json<ExpansionStatus> {
    Json(state.monitor.expansion_status())
}

async fn start_expansion_handler(State(state): State<Arc<AdminApi>>) -> Response {
    match state.monitor.start_expansion().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(expansion_error_status(&e), e.to_string()),
    }
}

async fn alerts_handler(State(state): State<Arc<AdminApi>>) -> Json<Vec<Alert>> {
    Json(state.monitor.alerts().recent())
}

async fn auth_middleware(
    State(state): State<Arc<AdminApi>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = state.config.admin_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if let Some(provided) = provided {
        if bool::from(provided.as_bytes().ct_eq(token.as_bytes())) {
            return next.run(request).await;
        }
    }

    tracing::debug!(path = %request.uri().path(), "rejected unauthenticated admin request");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, r#"Bearer realm="combfs-mgmt""#)],
        "Unauthorized",
    )
        .into_response()
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertLog;
    use crate::clock::ManualClock;
    use crate::expansion::ExpansionState;
    use crate::metrics::MonitorMetrics;
    use crate::monitor::{ClusterMonitor, MonitorContext, MonitorSettings};
    use crate::sample::DiskCounters;
    use crate::store::MemoryConfigStore;
    use crate::testing::FakeCluster;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Harness {
        router: Router,
        shutdown: CancellationToken,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    async fn harness(cluster: FakeCluster, token: Option<&str>, warm: bool) -> Harness {
        let ctx = MonitorContext {
            client: Arc::new(cluster),
            store: Arc::new(MemoryConfigStore::new()),
            clock: Arc::new(ManualClock::new(5_000)),
            alerts: Arc::new(AlertLog::new(16)),
            metrics: MonitorMetrics::new(),
        };
        let settings = MonitorSettings {
            max_cluster_size: 2,
            disks_per_node: 1,
            pre_expansion_nodes: 1,
            tick_interval: Duration::from_secs(3600),
            sample_timeout: Duration::from_millis(200),
        };
        let mut monitor = ClusterMonitor::new(ctx, settings);
        if warm {
            monitor.tick().await;
        }
        let shutdown = CancellationToken::new();
        let (handle, _join) = monitor.spawn(shutdown.clone());

        let config = MonitorConfig {
            admin_token: token.map(str::to_string),
            ..MonitorConfig::default()
        };
        let api = Arc::new(AdminApi::new(handle, Arc::new(config)));
        Harness {
            router: api.router(),
            shutdown,
        }
    }

    async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    async fn post_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let h = harness(FakeCluster::new(2, 1), None, false).await;
        let (status, json) = get_json(&h.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_ready_requires_quorum() {
        let cluster = FakeCluster::new(2, 1);
        cluster.set_quorum(false);
        let h = harness(cluster, None, true).await;
        let (status, json) = get_json(&h.router, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "starting");

        let h = harness(FakeCluster::new(2, 1), None, true).await;
        let (status, _) = get_json(&h.router, "/ready").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tasks_listing_and_lookup() {
        let cluster = FakeCluster::new(2, 1);
        cluster.set_all(TaskKind::ScanFrags, DiskCounters::new(1, 40));
        let h = harness(cluster, None, true).await;

        let (status, json) = get_json(&h.router, "/api/v1/tasks").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().map(Vec::len), Some(TaskKind::count()));

        let (status, json) = get_json(&h.router, "/api/v1/tasks/scan-frags").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["task"], "scan-frags");
        assert_eq!(json["live_cells"], 2);
        assert_eq!(json["completion_percent"], 40.0);

        let (status, json) = get_json(&h.router, "/api/v1/tasks/5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["task"], "scan-frags");
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let h = harness(FakeCluster::new(2, 1), None, false).await;
        let (status, json) = get_json(&h.router, "/api/v1/tasks/defrag").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("defrag"));
    }

    #[tokio::test]
    async fn test_watermark_endpoint() {
        let h = harness(FakeCluster::new(2, 1), None, true).await;
        let (status, json) = get_json(&h.router, "/api/v1/watermark").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.get("query_integrity_time").is_some());
        assert!(json.get("saved_query_integrity_time").is_some());
    }

    #[tokio::test]
    async fn test_reset_sys_cache_endpoint() {
        let h = harness(FakeCluster::new(2, 1), None, true).await;
        let (status, json) = post_json(&h.router, "/api/v1/sys-cache/reset").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["task"], "populate-sys-cache");
        assert_eq!(json["previous_completion_time"], 0);
    }

    #[tokio::test]
    async fn test_start_expansion_then_conflict() {
        let h = harness(FakeCluster::new(2, 1), None, true).await;

        let (status, json) = get_json(&h.router, "/api/v1/expansion").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], "ready");

        let (status, json) = post_json(&h.router, "/api/v1/expansion/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], ExpansionState::Sloshing.as_str());
        assert_eq!(json["start_time"], 5_000);

        let (status, json) = post_json(&h.router, "/api/v1/expansion/start").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_status_and_metrics() {
        let h = harness(FakeCluster::new(2, 1), None, true).await;
        let (status, json) = get_json(&h.router, "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ready"], true);
        assert_eq!(json["has_quorum"], true);
        assert_eq!(json["expansion"]["state"], "ready");

        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let output = String::from_utf8_lossy(&body);
        assert!(output.contains("# TYPE combfs_monitor_ticks_total counter"));
        assert!(output.contains("combfs_task_completion_time_ms{task=\"super\"}"));
    }

    #[tokio::test]
    async fn test_alerts_endpoint_empty() {
        let h = harness(FakeCluster::new(2, 1), None, false).await;
        let (status, json) = get_json(&h.router, "/api/v1/alerts").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_token_required_when_configured() {
        let h = harness(FakeCluster::new(2, 1), Some("secret-token"), false).await;

        let request = Request::builder().uri("/api/v1/tasks").body(Body::empty()).unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

        let request = Request::builder()
            .uri("/api/v1/tasks")
            .header("Authorization", "Bearer wrong-token")
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/api/v1/tasks")
            .header("Authorization", "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/api/v1/tasks")
            .header("Authorization", "Bearer secret-token")
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_is_public_and_hardened() {
        let h = harness(FakeCluster::new(2, 1), Some("secret-token"), false).await;
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
            "nosniff"
        );
    }
}
