use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Extension, Path};
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use axum::{routing::get, AddExtensionLayer, Json, Router};
use futures::prelude::*;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{AppError, AppErrorExt, HttpResult};
use crate::k8s::{ClusterRendering, FleetSnapshotHandle};
use flower_addon_core::partition::PartitionAssignment;
use flower_addon_core::registration::{RegistrationPolicy, SignerDescriptor, SignerLocation};

/// State shared by all HTTP handlers.
#[derive(Clone)]
struct ServerState {
    config: Arc<Config>,
    fleet: FleetSnapshotHandle,
    policy: Arc<RegistrationPolicy>,
    metrics: PrometheusHandle,
}

/// Spawn the HTTP server used for values, metrics & healthchecks.
pub fn spawn_http_server(
    config: Arc<Config>, fleet: FleetSnapshotHandle, policy: Arc<RegistrationPolicy>, metrics: PrometheusHandle, mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<Result<()>> {
    let port = config.http_port;
    let state = ServerState { config, fleet, policy, metrics };
    let app = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/metrics", get(prometheus_scrape))
        .route("/signer", get(signer))
        .route("/assignments", get(assignments))
        .route("/values/:cluster", get(cluster_values))
        .layer(AddExtensionLayer::new(state));
    let server = axum::Server::bind(&([0, 0, 0, 0], port).into())
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _res = shutdown.recv().await;
        });
    tracing::info!("http server is listening at 0.0.0.0:{}", port);
    tokio::spawn(server.map_err(anyhow::Error::from))
}

/// Handle Prometheus metrics scraping.
async fn prometheus_scrape(Extension(state): Extension<ServerState>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("text/plain; version=0.0.4"));
    (StatusCode::OK, headers, state.metrics.render())
}

/// Describe the external signer which the signer controller must react to.
async fn signer(Extension(state): Extension<ServerState>) -> Json<SignerLocation> {
    Json(state.policy.signer_identity())
}

/// The partition assignment of every enrolled cluster, computed from one fleet snapshot.
async fn assignments(Extension(state): Extension<ServerState>) -> HttpResult<Json<BTreeMap<String, PartitionAssignment>>> {
    let fleet = state.fleet.load_full();
    fleet.assignments().map(Json).map_err(AppError::into_status)
}

/// The rendered values & registration parameters of a single cluster.
async fn cluster_values(Path(cluster): Path<String>, Extension(state): Extension<ServerState>) -> HttpResult<Json<ClusterRendering>> {
    tracing::debug!(%cluster, "rendering cluster values");
    let defaults = state.config.default_values();
    let fleet = state.fleet.load_full();
    fleet.render(&defaults, &state.policy, &cluster).map(Json).map_err(AppError::into_status)
}
