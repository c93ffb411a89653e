//! Addon values handed to the manifest rendering collaborator.

use std::collections::BTreeMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::partition::{self, PartitionAssignment};

/// The default address of the SuperLink server.
pub const DEFAULT_SUPERLINK_ADDRESS: &str = "superlink.flower-system.svc.cluster.local";
/// The default port of the SuperLink Fleet API.
pub const DEFAULT_SUPERLINK_PORT: u16 = 9092;
/// The default SuperNode image.
pub const DEFAULT_SUPERNODE_IMAGE: &str = "flwr/supernode:1.15.0";
/// The default image pull policy.
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// A set of named values.
pub type Values = BTreeMap<String, Value>;

/// Merge the given value sets into one.
///
/// Sets are applied in order, so for any key present in more than one set the value of the last
/// set wins. Callers must pass defaults first and overriding values last.
pub fn merge_values<'a, I>(value_sets: I) -> Values
where
    I: IntoIterator<Item = &'a Values>,
{
    value_sets.into_iter().fold(Values::new(), |mut acc, values| {
        acc.extend(values.iter().map(|(key, val)| (key.clone(), val.clone())));
        acc
    })
}

/// Convert any serializable struct into a set of named values.
pub fn to_values<T: Serialize>(val: &T) -> AppResult<Values> {
    let json = serde_json::to_value(val).context("error serializing addon values").map_err(AppError::Ise)?;
    match json {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(AppError::InvalidInput(format!("addon values must serialize to an object, got {}", other))),
    }
}

/// The values used for rendering the agent manifests of a cluster.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlowerAddonValues {
    /// The name of the member cluster.
    pub cluster_name: String,
    /// The address of the SuperLink server.
    pub super_link_address: String,
    /// The port of the SuperLink Fleet API.
    pub super_link_port: u16,
    /// The partition of the member cluster.
    #[serde(flatten)]
    pub partition: PartitionAssignment,
    /// The SuperNode image.
    pub image: String,
    /// The image pull policy.
    pub image_pull_policy: String,
}

impl Default for FlowerAddonValues {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            super_link_address: DEFAULT_SUPERLINK_ADDRESS.into(),
            super_link_port: DEFAULT_SUPERLINK_PORT,
            partition: PartitionAssignment::default(),
            image: DEFAULT_SUPERNODE_IMAGE.into(),
            image_pull_policy: DEFAULT_IMAGE_PULL_POLICY.into(),
        }
    }
}

impl FlowerAddonValues {
    /// Create the default values of the given cluster.
    pub fn for_cluster(defaults: &Self, cluster_name: &str) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ..defaults.clone()
        }
    }
}

/// Compute the partition values of `cluster` against the given enrolled membership.
///
/// Clusters which are not yet enrolled get the single-partition default.
pub fn partition_values<S: AsRef<str>>(members: &[S], cluster: &str) -> AppResult<Values> {
    let assignment = partition::assign_or_default(members, cluster)?;
    to_values(&assignment)
}

/// Render the complete value set of `cluster`.
///
/// Layers are merged as `defaults -> overrides -> partition`, so the computed partition can never
/// be shadowed by a user supplied override.
pub fn render_values<S: AsRef<str>>(defaults: &FlowerAddonValues, overrides: &Values, members: &[S], cluster: &str) -> AppResult<Values> {
    let base = to_values(&FlowerAddonValues::for_cluster(defaults, cluster))?;
    let partition = partition_values(members, cluster)?;
    Ok(merge_values([&base, overrides, &partition]))
}

#[cfg(test)]
mod test {
    use maplit::btreemap;
    use serde_json::json;

    use super::*;

    fn values(pairs: BTreeMap<&str, Value>) -> Values {
        pairs.into_iter().map(|(key, val)| (key.to_string(), val)).collect()
    }

    #[test]
    fn merge_is_last_writer_wins_over_union_of_keys() {
        let first = values(btreemap! {"a" => json!(1), "b" => json!(2)});
        let second = values(btreemap! {"b" => json!(3), "c" => json!(4)});
        let merged = merge_values([&first, &second]);
        assert_eq!(merged, values(btreemap! {"a" => json!(1), "b" => json!(3), "c" => json!(4)}));
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        let merged = merge_values(std::iter::empty::<&Values>());
        assert!(merged.is_empty());
    }

    #[test]
    fn merge_order_is_significant() {
        let first = values(btreemap! {"image" => json!("a")});
        let second = values(btreemap! {"image" => json!("b")});
        assert_eq!(merge_values([&first, &second])["image"], json!("b"));
        assert_eq!(merge_values([&second, &first])["image"], json!("a"));
    }

    #[test]
    fn default_values_use_renderer_keys() {
        let vals = to_values(&FlowerAddonValues::for_cluster(&FlowerAddonValues::default(), "cluster-a")).unwrap();
        let expected = values(btreemap! {
            "clusterName" => json!("cluster-a"),
            "superLinkAddress" => json!("superlink.flower-system.svc.cluster.local"),
            "superLinkPort" => json!(9092),
            "partitionID" => json!(0),
            "numPartitions" => json!(1),
            "image" => json!("flwr/supernode:1.15.0"),
            "imagePullPolicy" => json!("IfNotPresent"),
        });
        assert_eq!(vals, expected);
    }

    #[test]
    fn non_object_values_are_rejected() {
        assert!(matches!(to_values(&42), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn render_layers_partition_over_overrides() {
        let overrides = values(btreemap! {
            "image" => json!("flwr/supernode:1.16.0"),
            "partitionID" => json!(99),
        });
        let members = ["cluster-b", "cluster-a", "cluster-c"];
        let vals = render_values(&FlowerAddonValues::default(), &overrides, &members, "cluster-c").unwrap();
        assert_eq!(vals["clusterName"], json!("cluster-c"));
        assert_eq!(vals["image"], json!("flwr/supernode:1.16.0"));
        assert_eq!(vals["partitionID"], json!(2));
        assert_eq!(vals["numPartitions"], json!(3));
    }

    #[test]
    fn render_uses_default_partition_for_unenrolled_cluster() {
        let members = ["cluster-a"];
        let vals = render_values(&FlowerAddonValues::default(), &Values::new(), &members, "cluster-new").unwrap();
        assert_eq!(vals["partitionID"], json!(0));
        assert_eq!(vals["numPartitions"], json!(1));
    }

    #[test]
    fn render_surfaces_invalid_membership() {
        let members = ["cluster-a", "cluster-a"];
        let res = render_values(&FlowerAddonValues::default(), &Values::new(), &members, "cluster-a");
        assert!(matches!(res, Err(AppError::InvalidInput(_))));
    }
}
