//! Label keys and selectors tying Kubernetes objects to a topology.

use std::collections::BTreeMap;

/// Label set of an object or selector.
pub type Labels = BTreeMap<String, String>;

/// Name of the Cluster an object belongs to.
pub const CLUSTER_NAME: &str = "tarantool.io/cluster-name";
/// Name of the Role a StatefulSet or pod belongs to.
pub const ROLE_NAME: &str = "tarantool.io/role-name";
/// Replicaset alias.
pub const REPLICASET_NAME: &str = "tarantool.io/replicaset-name";
/// Replicaset UUID.
pub const REPLICASET_UUID: &str = "tarantool.io/replicaset-uuid";
/// Replicaset ordinal within its Role.
pub const REPLICASET_ORDINAL: &str = "tarantool.io/replicaset-ordinal";
/// Hash of the pod template the StatefulSet was built from.
pub const POD_TEMPLATE_HASH: &str = "tarantool.io/replicaset-pod-template-hash";

/// Selects every object of a cluster.
pub fn cluster_selector(cluster: &str) -> Labels {
    Labels::from([(CLUSTER_NAME.to_string(), cluster.to_string())])
}

/// Selects every object of a role.
pub fn role_selector(cluster: &str, role: &str) -> Labels {
    let mut labels = cluster_selector(cluster);
    labels.insert(ROLE_NAME.to_string(), role.to_string());
    labels
}

/// Selects the objects of one replicaset of a role.
pub fn ordinal_selector(cluster: &str, role: &str, ordinal: i32) -> Labels {
    let mut labels = role_selector(cluster, role);
    labels.insert(REPLICASET_ORDINAL.to_string(), ordinal.to_string());
    labels
}

/// Renders a label selector for list calls.
pub fn to_selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `labels` carries every pair of `selector`.
pub fn matches(labels: Option<&Labels>, selector: &Labels) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

/// Name of pod `ordinal` of a StatefulSet.
pub fn pod_name(stateful_set: &str, ordinal: i32) -> String {
    format!("{stateful_set}-{ordinal}")
}

/// Merges label sets, later ones winning.
pub fn merge<'a>(sets: impl IntoIterator<Item = &'a Labels>) -> Labels {
    sets.into_iter()
        .flat_map(|set| set.iter())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
