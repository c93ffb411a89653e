use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::k8s::{CsrApprover, FleetSnapshotHandle, FleetWatcher};
use crate::server::spawn_http_server;
use flower_addon_core::registration::RegistrationPolicy;

/// The application object of the flower addon manager.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,
    /// The most recently published fleet snapshot.
    _fleet: FleetSnapshotHandle,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the fleet watcher.
    fleet_handle: JoinHandle<Result<()>>,
    /// The join handle of the CSR approver, if enabled.
    csr_handle: Option<JoinHandle<Result<()>>>,
    /// The join handle of the HTTP server.
    http_server: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>, metrics: PrometheusHandle) -> Result<Self> {
        // App shutdown channel.
        let (shutdown_tx, shutdown_rx) = broadcast::channel(10);

        // Initialize K8s client.
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;
        let policy = Arc::new(RegistrationPolicy::new(config.signer_location()));

        // Spawn various core tasks.
        let (fleet_watcher, fleet) = FleetWatcher::new(client.clone(), shutdown_tx.subscribe());
        let fleet_handle = fleet_watcher.spawn();

        let csr_handle = if config.auto_approve_csrs {
            Some(CsrApprover::new(client, policy.clone(), fleet.clone(), shutdown_tx.subscribe()).spawn())
        } else {
            tracing::info!("CSR auto approval is disabled");
            None
        };

        let http_server = spawn_http_server(config.clone(), fleet.clone(), policy, metrics, shutdown_tx.subscribe());

        Ok(Self {
            _config: config,
            _fleet: fleet,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
            shutdown_tx,
            fleet_handle,
            csr_handle,
            http_server,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("flower addon manager is shutting down");
        if let Err(err) = self.fleet_handle.await.context("error joining fleet watcher handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down fleet watcher");
        }
        if let Some(csr_handle) = self.csr_handle {
            if let Err(err) = csr_handle.await.context("error joining CSR approver handle").and_then(|res| res) {
                tracing::error!(error = ?err, "error shutting down CSR approver");
            }
        }
        if let Err(err) = self.http_server.await.context("error joining http server handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down http server");
        }

        tracing::debug!("flower addon manager shutdown complete");
        Ok(())
    }
}
