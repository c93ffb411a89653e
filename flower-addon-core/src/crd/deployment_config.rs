//! AddOnDeploymentConfig resource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::values::Values;

/// Spec of the AddOnDeploymentConfig resource.
///
/// Users attach one of these to a cluster's addon to override rendered values.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    group = "addon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "AddOnDeploymentConfig",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct AddOnDeploymentConfigSpec {
    /// A list of name-value variables used to override values of the agent manifests.
    #[serde(default)]
    pub customized_variables: Vec<CustomizedVariable>,
}

/// A single customized variable.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct CustomizedVariable {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl AddOnDeploymentConfig {
    /// The value overrides carried by this config.
    ///
    /// Variables are applied in order, so a repeated name keeps its last value.
    pub fn to_values(&self) -> Values {
        self.spec
            .customized_variables
            .iter()
            .filter(|var| !var.name.is_empty())
            .map(|var| (var.name.clone(), Value::String(var.value.clone())))
            .collect()
    }
}
