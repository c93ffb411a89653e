//! Kubernetes controllers.
//!
//! The fleet watcher observes the flower `ManagedClusterAddOn` objects of the hub, along with any
//! `AddOnDeploymentConfig` objects they reference, and republishes an immutable fleet snapshot
//! after every change. All per-cluster values are computed against one such snapshot, so a round
//! of computations never mixes two different views of the fleet.
//!
//! The CSR approver observes the certificate signing requests raised by flower addon agents. Only
//! requests of clusters enrolled in the current fleet snapshot are handed to the registration
//! policy, and those it admits are approved. It never signs anything; signing is left to the signer controller
//! which owns the flower CA secret.

mod csr;
mod fleet;

use std::time::Duration;

pub use csr::CsrApprover;
pub use fleet::{ClusterRendering, FleetSnapshot, FleetSnapshotHandle, FleetWatcher};

/// Metric counting errors from the k8s watch streams.
const METRIC_WATCHER_ERRORS: &str = "flower_addon_watcher_errors";
/// The delay applied after a watch stream error before polling it again.
const WATCHER_ERROR_DELAY: Duration = Duration::from_secs(10);
