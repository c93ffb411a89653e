//! Open Cluster Management resources consumed by the flower addon.
//!
//! These types only model the fields the addon reads. The CRDs themselves are owned and
//! installed by Open Cluster Management.
//!
//! References:
//! - https://open-cluster-management.io/concepts/addon/
//! - https://github.com/open-cluster-management-io/api/tree/main/addon/v1alpha1

mod addon;
mod deployment_config;

use kube::Resource;

pub use addon::{enrolled_members, AddOnConfigReference, ManagedClusterAddOn, ManagedClusterAddOnSpec};
pub use deployment_config::{AddOnDeploymentConfig, AddOnDeploymentConfigSpec, CustomizedVariable};

/// The API group of the addon resources.
pub const ADDON_API_GROUP: &str = "addon.open-cluster-management.io";

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The namespace of this object.
    fn namespace(&self) -> &str;

    /// The name of this object.
    fn name(&self) -> &str;

    /// The `{namespace}/{name}` key of this object.
    fn key(&self) -> String {
        format!("{}/{}", self.namespace(), self.name())
    }
}

impl RequiredMetadata for ManagedClusterAddOn {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}

impl RequiredMetadata for AddOnDeploymentConfig {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}
