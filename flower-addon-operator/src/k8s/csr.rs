use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use k8s_openapi::api::certificates::v1::{CertificateSigningRequest, CertificateSigningRequestCondition, CertificateSigningRequestStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams, PostParams};
use kube::client::Client;
use kube::runtime::watcher::{watcher, Error as WatcherError, Event};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};

use super::{FleetSnapshot, FleetSnapshotHandle, METRIC_WATCHER_ERRORS, WATCHER_ERROR_DELAY};
use flower_addon_core::registration::{CsrAdmission, RegistrationPolicy};
use flower_addon_core::ADDON_NAME;

/// The default timeout to use for API calls.
const API_TIMEOUT: Duration = Duration::from_secs(5);
/// The delay applied before retrying a failed approval.
const RETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// The CSR condition type marking a request as approved.
const CONDITION_APPROVED: &str = "Approved";
/// The CSR condition type marking a request as denied.
const CONDITION_DENIED: &str = "Denied";
/// The reason recorded on approvals made by this controller.
const APPROVAL_REASON: &str = "AutoApprovedByFlowerAddon";
/// The label which Open Cluster Management sets to the requesting cluster's name.
const LABEL_OCM_CLUSTER_NAME: &str = "open-cluster-management.io/cluster-name";
/// The label which Open Cluster Management sets to the name of the requesting addon.
const LABEL_OCM_ADDON_NAME: &str = "open-cluster-management.io/addon-name";

const METRIC_CSR_APPROVED: &str = "flower_addon_csr_approved";
const METRIC_CSR_REJECTED: &str = "flower_addon_csr_rejected";
const METRIC_CSR_APPROVAL_ERRORS: &str = "flower_addon_csr_approval_errors";

/// A result type used for CSR events coming from K8s.
type CsrEventResult = std::result::Result<Event<CertificateSigningRequest>, WatcherError>;

/// Check if the given CSR already carries an approval or denial.
fn is_decided(csr: &CertificateSigningRequest) -> bool {
    csr.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|cond| cond.status == "True" && (cond.type_ == CONDITION_APPROVED || cond.type_ == CONDITION_DENIED))
        })
        .unwrap_or(false)
}

/// The action to take on an observed CSR.
#[derive(Clone, Debug, PartialEq, Eq)]
enum CsrAction {
    /// The CSR already carries an approval or denial.
    Skip,
    /// The CSR was not raised by a flower addon agent.
    Ignore,
    /// The CSR was raised by a cluster which is not enrolled in the current fleet snapshot.
    Defer { cluster: String },
    /// The CSR was raised by an enrolled cluster, but the registration policy refused it.
    Reject { cluster: String },
    /// The CSR is to be approved on behalf of the given cluster.
    Approve { cluster: String },
}

/// The name of the cluster which raised the given CSR through its flower addon agent.
fn requesting_cluster(csr: &CertificateSigningRequest) -> Option<&str> {
    let labels = csr.metadata.labels.as_ref()?;
    if labels.get(LABEL_OCM_ADDON_NAME).map(String::as_str) != Some(ADDON_NAME) {
        return None;
    }
    labels.get(LABEL_OCM_CLUSTER_NAME).map(String::as_str).filter(|cluster| !cluster.is_empty())
}

/// Decide what to do with the given CSR.
///
/// Only CSRs raised by the flower addon agent of a cluster enrolled in the given fleet snapshot
/// are ever routed to the registration policy.
fn decide(policy: &impl CsrAdmission, fleet: &FleetSnapshot, csr: &CertificateSigningRequest) -> CsrAction {
    if is_decided(csr) {
        return CsrAction::Skip;
    }
    let cluster = match requesting_cluster(csr) {
        Some(cluster) => cluster.to_string(),
        None => return CsrAction::Ignore,
    };
    if !fleet.is_enrolled(&cluster) {
        return CsrAction::Defer { cluster };
    }
    if policy.admit(&csr.spec.signer_name, &csr.spec.request.0).approved {
        CsrAction::Approve { cluster }
    } else {
        CsrAction::Reject { cluster }
    }
}

/// Add an approval condition to the given CSR.
fn with_approval(mut csr: CertificateSigningRequest, now: Time) -> CertificateSigningRequest {
    let status = csr.status.get_or_insert_with(CertificateSigningRequestStatus::default);
    status.conditions.get_or_insert_with(Vec::new).push(CertificateSigningRequestCondition {
        type_: CONDITION_APPROVED.into(),
        status: "True".into(),
        reason: Some(APPROVAL_REASON.into()),
        message: Some("approved by the flower addon registration policy".into()),
        last_update_time: Some(now.clone()),
        last_transition_time: Some(now),
    });
    csr
}

/// A K8s controller approving CSRs admitted by the registration policy.
pub struct CsrApprover {
    /// K8s client.
    client: Client,
    /// The policy used to admit CSRs.
    policy: Arc<RegistrationPolicy>,
    /// The fleet snapshot used to verify that a requesting cluster is enrolled.
    fleet: FleetSnapshotHandle,
    /// A channel used for triggering graceful shutdown.
    shutdown: BroadcastStream<()>,

    /// A channel of CSR names for which approval is to be retried.
    retry_tx: mpsc::Sender<String>,
    /// A channel of CSR names for which approval is to be retried.
    retry_rx: ReceiverStream<String>,
    /// Admitted CSRs whose approval failed and is pending a retry.
    pending: HashMap<String, CertificateSigningRequest>,
}

impl CsrApprover {
    /// Create a new instance.
    pub fn new(client: Client, policy: Arc<RegistrationPolicy>, fleet: FleetSnapshotHandle, shutdown: broadcast::Receiver<()>) -> Self {
        metrics::register_counter!(METRIC_CSR_APPROVED, metrics::Unit::Count, "CSRs approved by the flower addon");
        metrics::register_counter!(METRIC_CSR_REJECTED, metrics::Unit::Count, "CSRs of enrolled clusters refused by the registration policy");
        metrics::register_counter!(METRIC_CSR_APPROVAL_ERRORS, metrics::Unit::Count, "errors while approving admitted CSRs");
        let (retry_tx, retry_rx) = mpsc::channel(1000);
        Self {
            client,
            policy,
            fleet,
            shutdown: BroadcastStream::new(shutdown),
            retry_tx,
            retry_rx: ReceiverStream::new(retry_rx),
            pending: Default::default(),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let csrs_api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        let csrs_params = ListParams::default().labels(&format!("{}={}", LABEL_OCM_ADDON_NAME, ADDON_NAME));
        let csrs_watcher = watcher(csrs_api, csrs_params);
        tokio::pin!(csrs_watcher);

        tracing::info!("CSR approver initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = csrs_watcher.next() => self.handle_csr_event(k8s_event_res).await,
                Some(name) = self.retry_rx.next() => self.handle_retry(name).await,
                _ = self.shutdown.next() => break,
            }
        }

        tracing::debug!("CSR approver shutdown");
        Ok(())
    }

    /// Handle `CertificateSigningRequest` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    async fn handle_csr_event(&mut self, res: CsrEventResult) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from CertificateSigningRequest k8s watcher");
                metrics::increment_counter!(METRIC_WATCHER_ERRORS, "resource" => "certificatesigningrequests");
                tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        match event {
            Event::Applied(csr) => self.reconcile(csr).await,
            Event::Deleted(csr) => {
                if let Some(name) = csr.metadata.name.as_ref() {
                    self.pending.remove(name);
                }
            }
            Event::Restarted(csrs) => {
                // Keep pending entries of live CSRs, as their retries are still in flight.
                self.pending.retain(|name, _| csrs.iter().any(|csr| csr.metadata.name.as_ref() == Some(name)));
                for csr in csrs {
                    self.reconcile(csr).await;
                }
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn handle_retry(&mut self, name: String) {
        // The entry is gone if the CSR was decided or deleted in the meantime.
        if let Some(csr) = self.pending.remove(&name) {
            self.reconcile(csr).await;
        }
    }

    /// Admit the given CSR & approve it if the policy allows.
    async fn reconcile(&mut self, csr: CertificateSigningRequest) {
        let name = match csr.metadata.name.clone() {
            Some(name) => name,
            None => return, // Not actually possible as K8s requires name.
        };
        let fleet = self.fleet.load_full();
        let cluster = match decide(self.policy.as_ref(), &fleet, &csr) {
            CsrAction::Approve { cluster } => cluster,
            CsrAction::Reject { cluster } => {
                tracing::warn!(csr = %name, %cluster, signer = %csr.spec.signer_name, "CSR refused by registration policy");
                metrics::increment_counter!(METRIC_CSR_REJECTED);
                self.pending.remove(&name);
                return;
            }
            CsrAction::Defer { cluster } => {
                // The fleet snapshot may lag behind the CSR watcher.
                tracing::debug!(csr = %name, %cluster, "CSR from cluster which is not enrolled, will retry");
                self.defer(name, csr);
                return;
            }
            CsrAction::Skip | CsrAction::Ignore => {
                self.pending.remove(&name);
                return;
            }
        };

        match self.approve(&csr, &name).await {
            Ok(()) => {
                tracing::info!(csr = %name, %cluster, signer = %csr.spec.signer_name, "approved CSR");
                metrics::increment_counter!(METRIC_CSR_APPROVED);
                self.pending.remove(&name);
            }
            Err(err) => {
                tracing::error!(error = ?err, csr = %name, %cluster, "error approving CSR, will retry");
                metrics::increment_counter!(METRIC_CSR_APPROVAL_ERRORS);
                self.defer(name, csr);
            }
        }
    }

    /// Park the given CSR until its next retry.
    ///
    /// At most one retry is in flight per CSR; a CSR which is already pending only has its cached
    /// object replaced.
    fn defer(&mut self, name: String, csr: CertificateSigningRequest) {
        if self.pending.insert(name.clone(), csr).is_none() {
            self.spawn_retry(name);
        }
    }

    /// Write an approval condition to the CSR's approval subresource.
    async fn approve(&self, csr: &CertificateSigningRequest, name: &str) -> Result<()> {
        let approved = with_approval(csr.clone(), Time(k8s_openapi::chrono::Utc::now()));
        let data = serde_json::to_vec(&approved).context("error serializing CSR approval")?;
        let api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        let req = kube::core::Request::new(api.resource_url())
            .replace_subresource("approval", name, &PostParams::default(), data)
            .context("error building CSR approval request")?;
        timeout(API_TIMEOUT, self.client.request::<CertificateSigningRequest>(req))
            .await
            .context("timeout while approving CSR")?
            .context("error approving CSR")?;
        Ok(())
    }

    /// Spawn a task which re-emits the given CSR name after the retry timeout.
    ///
    /// The retry queue is bounded, so the send is moved onto its own task in order to never
    /// block the controller loop which drains it.
    fn spawn_retry(&self, name: String) {
        let tx = self.retry_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RETRY_TIMEOUT).await;
            let _res = tx.send(name).await;
        });
    }
}
