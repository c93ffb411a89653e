//! ManagedClusterAddOn resource.
//!
//! A `ManagedClusterAddOn` named after the addon lives in the namespace of each member cluster
//! the addon is enabled on. The set of these objects is therefore the fleet membership.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{RequiredMetadata, ADDON_API_GROUP};
use crate::partition::FleetMember;
use crate::ADDON_NAME;

/// The resource name of `AddOnDeploymentConfig` objects, as used in config references.
const DEPLOYMENT_CONFIG_RESOURCE: &str = "addondeploymentconfigs";

/// Spec of the ManagedClusterAddOn resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    group = "addon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ManagedClusterAddOn",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterAddOnSpec {
    /// The namespace on the member cluster into which the agent is installed.
    #[serde(default)]
    pub install_namespace: Option<String>,
    /// Configuration objects referenced by this addon.
    #[serde(default)]
    pub configs: Vec<AddOnConfigReference>,
}

/// A reference to an addon configuration object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddOnConfigReference {
    #[serde(default)]
    pub group: String,
    pub resource: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

impl ManagedClusterAddOn {
    /// Check if this object enables the flower addon.
    pub fn is_flower_addon(&self) -> bool {
        self.name() == ADDON_NAME && !self.namespace().is_empty()
    }

    /// The name of the member cluster this addon object belongs to.
    pub fn cluster_name(&self) -> &str {
        self.namespace()
    }

    /// Check if this addon is being withdrawn from its cluster.
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// The `{namespace}/{name}` key of the `AddOnDeploymentConfig` referenced by this addon, if any.
    ///
    /// References without a namespace resolve to the namespace of the addon object.
    pub fn deployment_config_key(&self) -> Option<String> {
        self.spec
            .configs
            .iter()
            .find(|cfg| cfg.group == ADDON_API_GROUP && cfg.resource == DEPLOYMENT_CONFIG_RESOURCE)
            .map(|cfg| format!("{}/{}", cfg.namespace.as_deref().unwrap_or_else(|| self.namespace()), cfg.name))
    }
}

/// Build a fleet membership snapshot from the given addon objects.
///
/// Only flower addon objects are considered. Addons being deleted yield a member which is no
/// longer enrolled.
pub fn enrolled_members<'a, I>(addons: I) -> Vec<FleetMember>
where
    I: IntoIterator<Item = &'a ManagedClusterAddOn>,
{
    addons
        .into_iter()
        .filter(|addon| addon.is_flower_addon())
        .map(|addon| FleetMember {
            name: addon.cluster_name().to_string(),
            enrolled: !addon.is_terminating(),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    use super::*;
    use crate::partition::{assign, enrolled_names, PartitionAssignment};

    fn addon(namespace: &str, name: &str) -> ManagedClusterAddOn {
        let mut addon = ManagedClusterAddOn::new(name, ManagedClusterAddOnSpec::default());
        addon.metadata = ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            ..Default::default()
        };
        addon
    }

    #[test]
    fn only_flower_addons_become_members() {
        let addons = vec![
            addon("cluster-b", ADDON_NAME),
            addon("cluster-a", "some-other-addon"),
            addon("cluster-a", ADDON_NAME),
            addon("cluster-c", ADDON_NAME),
        ];
        let members = enrolled_members(&addons);
        let names = enrolled_names(&members);
        assert_eq!(names, vec!["cluster-b", "cluster-a", "cluster-c"]);
        assert_eq!(assign(&names, "cluster-a").unwrap(), PartitionAssignment { partition_id: 0, num_partitions: 3 });
        assert_eq!(assign(&names, "cluster-c").unwrap(), PartitionAssignment { partition_id: 2, num_partitions: 3 });
    }

    #[test]
    fn terminating_addons_are_not_enrolled() {
        let mut withdrawn = addon("cluster-a", ADDON_NAME);
        withdrawn.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        let addons = vec![withdrawn, addon("cluster-b", ADDON_NAME)];
        let members = enrolled_members(&addons);
        assert_eq!(members, vec![FleetMember { name: "cluster-a".into(), enrolled: false }, FleetMember::enrolled("cluster-b")]);
        assert_eq!(enrolled_names(&members), vec!["cluster-b"]);
    }

    #[test]
    fn deployment_config_reference_is_resolved() {
        let mut with_config = addon("cluster-a", ADDON_NAME);
        with_config.spec.configs = vec![
            AddOnConfigReference {
                group: "example.com".into(),
                resource: DEPLOYMENT_CONFIG_RESOURCE.into(),
                namespace: Some("elsewhere".into()),
                name: "ignored".into(),
            },
            AddOnConfigReference {
                group: ADDON_API_GROUP.into(),
                resource: DEPLOYMENT_CONFIG_RESOURCE.into(),
                namespace: None,
                name: "flower-config".into(),
            },
        ];
        assert_eq!(with_config.deployment_config_key().as_deref(), Some("cluster-a/flower-config"));
        assert_eq!(addon("cluster-a", ADDON_NAME).deployment_config_key(), None);
    }
}
