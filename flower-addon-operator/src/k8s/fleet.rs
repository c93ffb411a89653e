use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use futures::stream::StreamExt;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::watcher::{watcher, Error as WatcherError, Event};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use super::{METRIC_WATCHER_ERRORS, WATCHER_ERROR_DELAY};
use flower_addon_core::crd::{enrolled_members, AddOnDeploymentConfig, ManagedClusterAddOn, RequiredMetadata};
use flower_addon_core::partition::{self, enrolled_names, FleetMember, PartitionAssignment};
use flower_addon_core::registration::{CsrRequestSpec, RegistrationPolicy};
use flower_addon_core::values::{self, FlowerAddonValues, Values};
use flower_addon_core::{AppResult, ADDON_NAME, AGENT_INSTALL_NAMESPACE};

/// A shared handle to the most recently published fleet snapshot.
pub type FleetSnapshotHandle = Arc<ArcSwap<FleetSnapshot>>;

/// A result type used for CR events coming from K8s.
type EventResult<T> = std::result::Result<Event<T>, WatcherError>;

/// An immutable view of the fleet at one point in time.
#[derive(Clone, Debug, Default)]
pub struct FleetSnapshot {
    /// All known flower addon objects, keyed by `{namespace}/{name}`.
    addons: HashMap<Arc<String>, Arc<ManagedClusterAddOn>>,
    /// All known deployment configs, keyed by `{namespace}/{name}`.
    deployment_configs: HashMap<Arc<String>, Arc<AddOnDeploymentConfig>>,
}

/// Everything the rendering collaborator needs for one cluster.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRendering {
    /// The merged values of the cluster's agent manifests.
    pub values: Values,
    /// The CSR the cluster's agent must present when registering.
    pub registration: CsrRequestSpec,
    /// The namespace on the member cluster into which the agent is installed.
    pub install_namespace: String,
}

impl FleetSnapshot {
    /// The fleet membership of this snapshot.
    pub fn members(&self) -> Vec<FleetMember> {
        enrolled_members(self.addons.values().map(Arc::as_ref))
    }

    /// Check if the given cluster is enrolled in this snapshot.
    pub fn is_enrolled(&self, cluster: &str) -> bool {
        self.members().iter().any(|member| member.enrolled && member.name == cluster)
    }

    /// Build a snapshot from the given set of addons.
    #[cfg(test)]
    pub(crate) fn from_addons(addons: Vec<ManagedClusterAddOn>) -> Self {
        let mut snapshot = Self::default();
        apply_event(&mut snapshot.addons, Event::Restarted(addons));
        snapshot
    }

    /// The value overrides of the deployment config referenced by the given cluster's addon.
    pub fn overrides(&self, cluster: &str) -> Values {
        let addon_key = format!("{}/{}", cluster, ADDON_NAME);
        self.addons
            .get(&addon_key)
            .and_then(|addon| addon.deployment_config_key())
            .and_then(|config_key| self.deployment_configs.get(&config_key))
            .map(|config| config.to_values())
            .unwrap_or_default()
    }

    /// Render the values & registration parameters of the given cluster.
    pub fn render(&self, defaults: &FlowerAddonValues, policy: &RegistrationPolicy, cluster: &str) -> AppResult<ClusterRendering> {
        let members = self.members();
        let values = values::render_values(defaults, &self.overrides(cluster), &enrolled_names(&members), cluster)?;
        let registration = policy.build_csr_spec(cluster)?;
        Ok(ClusterRendering {
            values,
            registration,
            install_namespace: AGENT_INSTALL_NAMESPACE.into(),
        })
    }

    /// The partition assignment of every enrolled cluster.
    pub fn assignments(&self) -> AppResult<BTreeMap<String, PartitionAssignment>> {
        let members = self.members();
        partition::assign_all(&enrolled_names(&members))
    }
}

/// Apply a watcher event to the given object map.
fn apply_event<T: RequiredMetadata>(objects: &mut HashMap<Arc<String>, Arc<T>>, event: Event<T>) {
    match event {
        Event::Applied(obj) => {
            let key = obj.key();
            tracing::debug!(%key, "object applied");
            objects.insert(Arc::new(key), Arc::new(obj));
        }
        Event::Deleted(obj) => {
            let key = obj.key();
            tracing::debug!(%key, "object deleted");
            objects.remove(&key);
        }
        Event::Restarted(objs) => {
            *objects = objs.into_iter().map(|obj| (Arc::new(obj.key()), Arc::new(obj))).collect();
            tracing::debug!(len = objects.len(), "object stream restarted");
        }
    }
}

/// A K8s event watcher of the fleet membership & its deployment configs.
pub struct FleetWatcher {
    /// K8s client.
    client: Client,
    /// A channel used for triggering graceful shutdown.
    shutdown: BroadcastStream<()>,

    fleet: FleetSnapshotHandle,
}

impl FleetWatcher {
    /// Create a new instance.
    pub fn new(client: Client, shutdown: broadcast::Receiver<()>) -> (Self, FleetSnapshotHandle) {
        metrics::register_counter!(METRIC_WATCHER_ERRORS, metrics::Unit::Count, "k8s watcher errors");
        let shutdown = BroadcastStream::new(shutdown);
        let fleet: FleetSnapshotHandle = Default::default();
        (Self { client, shutdown, fleet: fleet.clone() }, fleet)
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let addons_api: Api<ManagedClusterAddOn> = Api::all(self.client.clone());
        let addons_params = ListParams::default().fields(&format!("metadata.name={}", ADDON_NAME));
        let addons_watcher = watcher(addons_api, addons_params);
        let configs_api: Api<AddOnDeploymentConfig> = Api::all(self.client.clone());
        let configs_watcher = watcher(configs_api, ListParams::default());
        tokio::pin!(addons_watcher, configs_watcher);

        tracing::info!("fleet watcher initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = addons_watcher.next() => self.handle_addon_event(k8s_event_res).await,
                Some(k8s_event_res) = configs_watcher.next() => self.handle_config_event(k8s_event_res).await,
                _ = self.shutdown.next() => break,
            }
        }

        tracing::debug!("fleet watcher shutdown");
        Ok(())
    }

    /// Handle `ManagedClusterAddOn` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    async fn handle_addon_event(&mut self, res: EventResult<ManagedClusterAddOn>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from ManagedClusterAddOn k8s watcher");
                metrics::increment_counter!(METRIC_WATCHER_ERRORS, "resource" => "managedclusteraddons");
                tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        let mut updated = self.fleet.load_full().as_ref().clone();
        apply_event(&mut updated.addons, event);
        updated.addons.retain(|_, addon| addon.is_flower_addon());
        tracing::debug!(members = updated.addons.len(), "publishing new fleet snapshot");
        self.fleet.store(Arc::new(updated));
    }

    /// Handle `AddOnDeploymentConfig` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    async fn handle_config_event(&mut self, res: EventResult<AddOnDeploymentConfig>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from AddOnDeploymentConfig k8s watcher");
                metrics::increment_counter!(METRIC_WATCHER_ERRORS, "resource" => "addondeploymentconfigs");
                tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        let mut updated = self.fleet.load_full().as_ref().clone();
        apply_event(&mut updated.deployment_configs, event);
        self.fleet.store(Arc::new(updated));
    }
}
