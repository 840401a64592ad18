//! Cluster Custom Resource Definition.
//!
//! A Cluster is the Cartridge topology as a whole. It owns nothing but the
//! cluster-wide service; Roles attach to it through the cluster-name label.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster is the Schema for the clusters API.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tarantool.io",
    version = "v1alpha2",
    kind = "Cluster",
    plural = "clusters",
    shortname = "tc",
    namespaced,
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Leader", "type":"string", "jsonPath":".status.leader"}"#,
    printcolumn = r#"{"name":"Bootstrapped", "type":"boolean", "jsonPath":".status.bootstrapped"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster DNS domain used in advertise URIs.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Port every instance listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: i32,

    /// Failover settings.
    #[serde(default)]
    pub failover: FailoverSpec,

    /// Pod to use as topology leader instead of an elected one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_leader: Option<String>,
}

fn default_domain() -> String {
    "cluster.local".to_string()
}

fn default_listen_port() -> i32 {
    3301
}

/// Cartridge failover mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailoverMode {
    /// Leaders never change.
    #[default]
    Disabled,
    /// Leaders are chosen by gossip.
    Eventual,
    /// Leaders are appointed through an external state provider.
    Stateful,
    /// Leaders are elected by Raft.
    Raft,
}

/// External storage used by stateful failover.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateProvider {
    /// etcd v2 API.
    Etcd2,
    /// Tarantool stateboard instance.
    Stateboard,
}

/// Failover specification.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailoverSpec {
    /// Failover mode.
    #[serde(default)]
    pub mode: FailoverMode,

    /// Seconds before a silent instance is considered dead.
    #[serde(default = "default_failover_timeout")]
    pub timeout: i32,

    /// State provider for stateful mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_provider: Option<StateProvider>,

    /// Enable fencing in stateful mode.
    #[serde(default)]
    pub fencing: bool,

    /// Fencing timeout, in seconds.
    #[serde(default = "default_fencing_timeout")]
    pub fencing_timeout: i32,

    /// Fencing pause, in seconds.
    #[serde(default = "default_fencing_pause")]
    pub fencing_pause: i32,

    /// etcd2 state provider settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd2: Option<Etcd2Spec>,

    /// Stateboard state provider settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateboard: Option<StateboardSpec>,
}

impl Default for FailoverSpec {
    fn default() -> Self {
        Self {
            mode: FailoverMode::default(),
            timeout: default_failover_timeout(),
            state_provider: None,
            fencing: false,
            fencing_timeout: default_fencing_timeout(),
            fencing_pause: default_fencing_pause(),
            etcd2: None,
            stateboard: None,
        }
    }
}

fn default_failover_timeout() -> i32 {
    20
}

fn default_fencing_timeout() -> i32 {
    10
}

fn default_fencing_pause() -> i32 {
    2
}

/// etcd2 state provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Etcd2Spec {
    /// etcd endpoints.
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// etcd user.
    #[serde(default)]
    pub username: String,

    /// Secret holding the etcd password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretReference>,

    /// Lock expiration, in seconds.
    #[serde(default = "default_lock_delay")]
    pub lock_delay: i32,

    /// Key prefix.
    #[serde(default)]
    pub prefix: String,
}

fn default_lock_delay() -> i32 {
    10
}

/// Stateboard state provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateboardSpec {
    /// Stateboard URI.
    pub uri: String,

    /// Secret holding the stateboard password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretReference>,
}

/// Reference to a key of a Secret.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Secret name.
    pub name: String,

    /// Secret namespace, the cluster's when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Key inside the secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Status of a Cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Current phase.
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Whether vshard has been bootstrapped.
    #[serde(default)]
    pub bootstrapped: bool,

    /// Pod acting as topology leader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

/// Cluster phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterPhase {
    /// Reconcile started.
    #[default]
    Pending,
    /// Syncing the cluster-wide service.
    SyncingService,
    /// Waiting for every role to be joined.
    WaitingForRoles,
    /// Waiting for a topology leader.
    WaitingForLeader,
    /// Cluster is bootstrapped and configured.
    Ready,
    /// vshard bootstrap is not possible with the current roles.
    UnableToBootstrap,
    /// Applying failover settings.
    FailoverConfiguring,
}

impl Cluster {
    /// Name of the topology leader pod, the foreign leader taking precedence.
    pub fn leader(&self) -> Option<&str> {
        self.spec
            .foreign_leader
            .as_deref()
            .filter(|leader| !leader.is_empty())
            .or_else(|| {
                self.status
                    .as_ref()
                    .and_then(|s| s.leader.as_deref())
                    .filter(|leader| !leader.is_empty())
            })
    }

    /// Records an elected leader.
    pub fn set_leader(&mut self, leader: impl Into<String>) {
        self.status.get_or_insert_with(Default::default).leader = Some(leader.into());
    }

    /// Whether vshard has been bootstrapped.
    pub fn is_bootstrapped(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.bootstrapped)
    }

    /// Marks vshard as bootstrapped. There is no way back.
    pub fn mark_bootstrapped(&mut self) {
        self.status.get_or_insert_with(Default::default).bootstrapped = true;
    }

    /// Current phase.
    pub fn phase(&self) -> ClusterPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Sets the phase.
    pub fn set_phase(&mut self, phase: ClusterPhase) {
        self.status.get_or_insert_with(Default::default).phase = phase;
    }

    /// Clears the status, keeping the bootstrap flag and the leader.
    pub fn reset_status(&mut self) {
        let status = self.status.take().unwrap_or_default();
        self.status = Some(ClusterStatus {
            phase: ClusterPhase::default(),
            bootstrapped: status.bootstrapped,
            leader: status.leader,
        });
    }
}
