//! Partition assignment for the enrolled fleet.
//!
//! Every enrolled cluster is given a dense, zero-based partition ID equal to its rank within the
//! lexicographically sorted set of enrolled cluster names. The partition count is the size of
//! that set. Assignments are computed from a membership snapshot handed in by the caller and are
//! never cached, as membership may change between calls.
//!
//! Because IDs are ranks, adding or removing a single member only shifts the IDs of members
//! whose names sort after the changed one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// A single cluster of the fleet, as reported by the fleet registry.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FleetMember {
    /// The fleet-unique name of the cluster.
    pub name: String,
    /// Whether the flower addon is enabled on the cluster.
    pub enrolled: bool,
}

impl FleetMember {
    /// Create a new enrolled member.
    pub fn enrolled(name: impl Into<String>) -> Self {
        Self { name: name.into(), enrolled: true }
    }
}

/// Collect the names of all enrolled members of the given snapshot.
///
/// Members with the addon disabled are excluded entirely rather than assigned a partition.
pub fn enrolled_names(members: &[FleetMember]) -> Vec<&str> {
    members.iter().filter(|member| member.enrolled).map(|member| member.name.as_str()).collect()
}

/// The partition assigned to a cluster.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct PartitionAssignment {
    /// The zero-based partition ID of the cluster.
    #[serde(rename = "partitionID")]
    pub partition_id: u32,
    /// The total number of partitions, never less than 1.
    #[serde(rename = "numPartitions")]
    pub num_partitions: u32,
}

impl Default for PartitionAssignment {
    /// The single-partition assignment given to clusters which are not yet enrolled.
    fn default() -> Self {
        Self { partition_id: 0, num_partitions: 1 }
    }
}

impl PartitionAssignment {
    /// Check if the given key belongs to this partition.
    ///
    /// Keys are hashed with seahash, so every holder of the same assignment set agrees on
    /// ownership regardless of platform.
    pub fn owns_key(&self, key: &[u8]) -> bool {
        let num_partitions = u64::from(self.num_partitions.max(1));
        seahash::hash(key) % num_partitions == u64::from(self.partition_id)
    }
}

/// Sort & validate the given membership snapshot.
///
/// Fails with `InvalidInput` on empty or duplicate names.
fn sorted_membership<S: AsRef<str>>(members: &[S]) -> AppResult<Vec<&str>> {
    let mut sorted: Vec<&str> = members.iter().map(AsRef::as_ref).collect();
    if sorted.iter().any(|name| name.is_empty()) {
        return Err(AppError::InvalidInput("fleet membership contains an empty cluster name".into()));
    }
    sorted.sort_unstable();
    if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(AppError::InvalidInput(format!("fleet membership contains duplicate cluster name {:?}", pair[0])));
    }
    Ok(sorted)
}

/// Convert a membership size into a partition count.
fn partition_count(len: usize) -> AppResult<u32> {
    u32::try_from(len.max(1)).map_err(|_| AppError::InvalidInput(format!("fleet membership of {} clusters exceeds the partition space", len)))
}

/// Compute the partition assignment of `target` within the given enrolled membership.
///
/// `members` must hold the complete set of currently enrolled cluster names, in any order.
pub fn assign<S: AsRef<str>>(members: &[S], target: &str) -> AppResult<PartitionAssignment> {
    if target.is_empty() {
        return Err(AppError::InvalidInput("target cluster name must not be empty".into()));
    }
    let sorted = sorted_membership(members)?;
    let num_partitions = partition_count(sorted.len())?;
    let rank = sorted.binary_search(&target).map_err(|_| AppError::NotEnrolled(target.into()))?;
    Ok(PartitionAssignment {
        // Rank is strictly below the member count, which was checked to fit above.
        partition_id: rank as u32,
        num_partitions,
    })
}

/// Compute the partition assignment of `target`, falling back to the single-partition default
/// when the target is not yet enrolled.
///
/// Invalid input is still surfaced as an error.
pub fn assign_or_default<S: AsRef<str>>(members: &[S], target: &str) -> AppResult<PartitionAssignment> {
    match assign(members, target) {
        Err(AppError::NotEnrolled(name)) => {
            tracing::debug!(cluster = %name, "cluster not enrolled, using default partition assignment");
            Ok(PartitionAssignment::default())
        }
        res => res,
    }
}

/// Compute the partition assignment of every member of the given enrolled membership.
///
/// Use this when a full round of assignments is needed, so that all members are assigned
/// against the same snapshot.
pub fn assign_all<S: AsRef<str>>(members: &[S]) -> AppResult<BTreeMap<String, PartitionAssignment>> {
    let sorted = sorted_membership(members)?;
    let num_partitions = partition_count(sorted.len())?;
    Ok(sorted
        .into_iter()
        .enumerate()
        .map(|(rank, name)| (name.to_string(), PartitionAssignment { partition_id: rank as u32, num_partitions }))
        .collect())
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use super::*;

    const FLEET: &[&str] = &["cluster-b", "cluster-a", "cluster-c"];

    macro_rules! assign_test {
        ($name:ident, $members:expr, $target:literal, $id:literal, $num:literal) => {
            #[test]
            fn $name() {
                let output = assign($members, $target).expect("expected assignment to succeed");
                let expected = PartitionAssignment { partition_id: $id, num_partitions: $num };
                assert!(expected == output, "expected assignment `{:?}` did not match actual assignment `{:?}`", expected, output);
            }
        };
    }

    assign_test!(first_of_three_gets_partition_zero, FLEET, "cluster-a", 0, 3);
    assign_test!(middle_of_three_gets_partition_one, FLEET, "cluster-b", 1, 3);
    assign_test!(last_of_three_gets_partition_two, FLEET, "cluster-c", 2, 3);
    assign_test!(single_member_owns_single_partition, &["solo"], "solo", 0, 1);
    assign_test!(ordering_is_bytewise, &["b", "B", "a", "A"], "a", 2, 4);

    #[test]
    fn full_set_yields_dense_partition_ids() {
        let members: Vec<String> = (0..25).map(|idx| format!("member-{}", (idx * 7) % 25)).collect();
        let ids: BTreeSet<u32> = members
            .iter()
            .map(|name| assign(&members, name).expect("member should be enrolled").partition_id)
            .collect();
        let expected: BTreeSet<u32> = (0..25).collect();
        assert_eq!(ids, expected, "partition IDs should form exactly 0..n");
    }

    #[test]
    fn assignment_is_independent_of_input_order() {
        let mut reversed = FLEET.to_vec();
        reversed.reverse();
        for name in FLEET {
            assert_eq!(assign(FLEET, name).unwrap(), assign(&reversed, name).unwrap(), "assignment of {} changed with input order", name);
        }
    }

    #[test]
    fn adding_member_only_shifts_members_sorting_after_it() {
        let before = vec!["alpha", "charlie", "delta", "echo"];
        let mut after = before.clone();
        after.push("bravo");

        for name in &before {
            let old = assign(&before, name).unwrap();
            let new = assign(&after, name).unwrap();
            assert_eq!(new.num_partitions, old.num_partitions + 1);
            if *name < "bravo" {
                assert_eq!(new.partition_id, old.partition_id, "{} sorts before the new member and must keep its ID", name);
            } else {
                assert_eq!(new.partition_id, old.partition_id + 1, "{} sorts after the new member and must shift by one", name);
            }
        }
    }

    #[test]
    fn removing_member_only_shifts_members_sorting_after_it() {
        let before = vec!["alpha", "bravo", "charlie", "delta"];
        let after = vec!["alpha", "charlie", "delta"];
        assert_eq!(assign(&after, "alpha").unwrap().partition_id, assign(&before, "alpha").unwrap().partition_id);
        assert_eq!(assign(&after, "charlie").unwrap().partition_id, assign(&before, "charlie").unwrap().partition_id - 1);
        assert_eq!(assign(&after, "delta").unwrap().partition_id, assign(&before, "delta").unwrap().partition_id - 1);
    }

    #[test]
    fn absent_target_is_not_enrolled() {
        let err = assign(FLEET, "cluster-z").unwrap_err();
        assert!(matches!(err, AppError::NotEnrolled(ref name) if name == "cluster-z"), "unexpected error {:?}", err);
    }

    #[test]
    fn empty_fleet_yields_not_enrolled_and_default_fallback() {
        let empty: &[&str] = &[];
        assert!(matches!(assign(empty, "cluster-a"), Err(AppError::NotEnrolled(_))));
        assert_eq!(assign_or_default(empty, "cluster-a").unwrap(), PartitionAssignment { partition_id: 0, num_partitions: 1 });
    }

    #[test]
    fn default_fallback_is_only_used_for_absent_targets() {
        assert_eq!(assign_or_default(FLEET, "cluster-z").unwrap(), PartitionAssignment::default());
        assert_eq!(assign_or_default(FLEET, "cluster-c").unwrap(), PartitionAssignment { partition_id: 2, num_partitions: 3 });
        assert!(matches!(assign_or_default(&["a", "a"], "a"), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn duplicate_members_are_invalid_input() {
        let err = assign(&["cluster-a", "cluster-b", "cluster-a"], "cluster-b").unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)), "unexpected error {:?}", err);
        assert!(matches!(assign_all(&["x", "x"]), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn empty_names_are_invalid_input() {
        assert!(matches!(assign(FLEET, ""), Err(AppError::InvalidInput(_))));
        assert!(matches!(assign(&["cluster-a", ""], "cluster-a"), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn assign_all_matches_per_member_assignment() {
        let all = assign_all(FLEET).unwrap();
        assert_eq!(all.len(), FLEET.len());
        for name in FLEET {
            assert_eq!(all[*name], assign(FLEET, name).unwrap());
        }
        let empty: &[&str] = &[];
        assert!(assign_all(empty).unwrap().is_empty());
    }

    #[test]
    fn disabled_members_are_excluded() {
        let members = vec![
            FleetMember::enrolled("cluster-b"),
            FleetMember { name: "cluster-a".into(), enrolled: false },
            FleetMember::enrolled("cluster-c"),
        ];
        let names = enrolled_names(&members);
        assert_eq!(names, vec!["cluster-b", "cluster-c"]);
        assert_eq!(assign(&names, "cluster-b").unwrap(), PartitionAssignment { partition_id: 0, num_partitions: 2 });
        assert!(matches!(assign(&names, "cluster-a"), Err(AppError::NotEnrolled(_))));
    }

    #[test]
    fn every_key_is_owned_by_exactly_one_partition() {
        let all = assign_all(FLEET).unwrap();
        for key in ["image-0001.png", "image-0002.png", "", "some/longer/key/path"] {
            let owners = all.values().filter(|assignment| assignment.owns_key(key.as_bytes())).count();
            assert_eq!(owners, 1, "key {:?} should have exactly one owner", key);
        }
        assert!(PartitionAssignment::default().owns_key(b"anything"));
    }

    #[test]
    fn assignment_serializes_with_renderer_keys() {
        let value = serde_json::to_value(PartitionAssignment { partition_id: 2, num_partitions: 3 }).unwrap();
        assert_eq!(value, serde_json::json!({"partitionID": 2, "numPartitions": 3}));
    }
}
