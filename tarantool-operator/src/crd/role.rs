//! Role Custom Resource Definition.
//!
//! A Role is a group of identical replicasets. Each replicaset is
//! materialised as one StatefulSet.

use k8s_openapi::api::apps::v1::StatefulSetUpdateStrategy;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodTemplateSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Role is the Schema for the roles API.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tarantool.io",
    version = "v1beta1",
    kind = "Role",
    plural = "roles",
    namespaced,
    status = "RoleStatus",
    printcolumn = r#"{"name":"Replicasets", "type":"integer", "jsonPath":".spec.replicasets"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// Number of replicasets.
    #[serde(default = "default_replicasets")]
    pub replicasets: i32,

    /// Template every replicaset is built from.
    #[serde(default)]
    pub replicaset_template: ReplicasetTemplate,

    /// Make every instance of a replicaset writable.
    #[serde(default)]
    pub all_rw: bool,

    /// vshard settings of the replicasets.
    #[serde(default)]
    pub vshard: VShardSpec,
}

impl Default for RoleSpec {
    fn default() -> Self {
        Self {
            replicasets: default_replicasets(),
            replicaset_template: ReplicasetTemplate::default(),
            all_rw: false,
            vshard: VShardSpec::default(),
        }
    }
}

fn default_replicasets() -> i32 {
    1
}

/// Replicaset template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicasetTemplate {
    /// Instances per replicaset.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Pod template of the instances.
    #[serde(default)]
    pub pod_template: PodTemplateSpec,

    /// Persistent volume claims of every instance.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,

    /// Seconds a new pod must be ready before it counts as available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ready_seconds: Option<i32>,

    /// Update strategy of the StatefulSets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<StatefulSetUpdateStrategy>,
}

impl Default for ReplicasetTemplate {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            pod_template: PodTemplateSpec::default(),
            volume_claim_templates: Vec::new(),
            min_ready_seconds: None,
            update_strategy: None,
        }
    }
}

fn default_replicas() -> i32 {
    1
}

/// vshard settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VShardSpec {
    /// vshard group of storage replicasets.
    #[serde(default = "default_vshard_group")]
    pub vshard_group_name: String,

    /// Cartridge roles enabled on every replicaset.
    #[serde(default)]
    pub cluster_roles: Vec<String>,

    /// Storage weight.
    #[serde(default = "default_weight")]
    pub weight: i32,
}

impl Default for VShardSpec {
    fn default() -> Self {
        Self {
            vshard_group_name: default_vshard_group(),
            cluster_roles: Vec::new(),
            weight: default_weight(),
        }
    }
}

fn default_vshard_group() -> String {
    "default".to_string()
}

fn default_weight() -> i32 {
    100
}

/// Status of a Role.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RoleStatus {
    /// Current phase.
    #[serde(default)]
    pub phase: RolePhase,
}

/// Role phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum RolePhase {
    /// Creating and updating StatefulSets.
    #[default]
    Pending,
    /// The labelled cluster does not exist yet.
    WaitingForCluster,
    /// Waiting for a topology leader.
    WaitingForLeader,
    /// Waiting for every instance to start.
    WaitForCartridgeReady,
    /// Joining instances into replicasets.
    Joining,
    /// Setting replicaset roles.
    Configuring,
    /// Waiting for the cluster to bootstrap vshard.
    WaitingForBootstrap,
    /// Setting storage weights.
    ConfiguringWeights,
    /// Every replicaset is joined and configured.
    Ready,
    /// The role cannot be applied as specified.
    ConfigError,
}

impl Role {
    /// Current phase.
    pub fn phase(&self) -> RolePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Sets the phase.
    pub fn set_phase(&mut self, phase: RolePhase) {
        self.status.get_or_insert_with(Default::default).phase = phase;
    }

    /// Total number of instances across all replicasets.
    pub fn expected_instances(&self) -> i32 {
        self.spec.replicasets * self.spec.replicaset_template.replicas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_role_spec() {
        let role: Role = serde_json::from_value(serde_json::json!({
            "apiVersion": "tarantool.io/v1beta1",
            "kind": "Role",
            "metadata": {"name": "storage", "namespace": "default"},
            "spec": {"replicasets": 2, "replicasetTemplate": {"replicas": 3}}
        }))
        .expect("Failed to deserialize Role");

        assert_eq!(role.spec.vshard.vshard_group_name, "default");
        assert_eq!(role.spec.vshard.weight, 100);
        assert!(!role.spec.all_rw);
        assert_eq!(role.expected_instances(), 6);
        assert_eq!(role.phase(), RolePhase::Pending);
    }

    #[test]
    fn phase_serialization() {
        let status = RoleStatus {
            phase: RolePhase::WaitForCartridgeReady,
        };
        let json = serde_json::to_value(&status).expect("Failed to serialize RoleStatus");
        assert_eq!(json["phase"], "WaitForCartridgeReady");
    }
}
