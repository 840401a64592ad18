//! Request and response types exchanged with the Cartridge admin API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Clusterwide configuration sections, keyed by section name.
pub type CartridgeConfigData = serde_json::Map<String, serde_json::Value>;

/// Role name to the roles it depends on.
pub type RolesHierarchy = BTreeMap<String, Vec<String>>;

/// Error object returned by Cartridge (`errors.new_class` instances).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuaError {
    /// Line the error was raised at.
    pub line: i64,
    /// Error class, e.g. "Bootstrapping vshard failed".
    pub class_name: String,
    /// Error message.
    pub err: String,
    /// File the error was raised in.
    pub file: String,
    /// Lua traceback.
    pub stack: String,
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name, self.err)
    }
}

impl std::error::Error for LuaError {}

/// Uniform `{res, err}` envelope returned by the driver's scripts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LuaCallResult<T> {
    /// Call result.
    pub res: T,
    /// Error object, when the call failed on the Cartridge side.
    pub err: Option<LuaError>,
}

/// Boolean `{res, err}` envelope.
pub type BooleanResult = LuaCallResult<bool>;

/// Server entry of `admin_edit_topology` join requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinServerParams {
    /// Advertise URI of the instance.
    pub uri: String,
    /// Instance UUID, generated by Cartridge when empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uuid: String,
}

/// Replicaset entry of `admin_edit_topology`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EditReplicasetParams {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alias: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub all_rw: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub weight: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failover_priority: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub vshard_group: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub join_servers: Vec<JoinServerParams>,
}

/// Server entry of `admin_edit_topology`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EditServerParams {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uri: String,
    pub uuid: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub expelled: bool,
}

/// Argument of `cartridge.admin_edit_topology`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EditTopologyParams {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<EditServerParams>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replicasets: Vec<EditReplicasetParams>,
}

/// Replicaset settings applied when joining instances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinRequest {
    /// Replicaset alias, `{role}-{ordinal}`.
    pub alias: String,
    /// Replicaset UUID.
    pub uuid: String,
    /// Cartridge roles enabled on the replicaset.
    pub roles: Vec<String>,
    /// Vshard weight.
    pub weight: i32,
    /// Vshard group name.
    pub vshard_group: String,
    /// Whether every instance of the replicaset is writable.
    pub all_rw: bool,
}

/// Result of a join call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Instances were added to the topology.
    Joined,
    /// Instances were already part of the topology.
    AlreadyJoined,
}

/// Cartridge failover mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverMode {
    #[default]
    Disabled,
    Eventual,
    Stateful,
    Raft,
}

/// Storage used by stateful failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverStateProvider {
    Etcd2,
    Stateboard,
}

/// Parameters of `cartridge.failover_set_params`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailoverParams {
    pub mode: FailoverMode,
    #[serde(rename = "failover_timeout", default, skip_serializing_if = "is_zero")]
    pub timeout: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_provider: Option<FailoverStateProvider>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fencing_enabled: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fencing_timeout: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fencing_pause: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd2_params: Option<Etcd2Params>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateboard_params: Option<StateboardParams>,
}

/// Connection parameters of the etcd2 state provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Etcd2Params {
    pub endpoints: Vec<String>,
    pub username: String,
    pub password: String,
    pub lock_delay: i32,
    pub prefix: String,
}

/// Connection parameters of the stateboard state provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateboardParams {
    pub uri: String,
    pub password: String,
}

impl FailoverParams {
    /// Whether `actual` already carries every parameter set here.
    ///
    /// Cartridge reports defaults for parameters that do not apply to the
    /// current mode, so only the ones relevant to `self.mode` are compared.
    pub fn is_satisfied_by(&self, actual: &FailoverParams) -> bool {
        if self.mode != actual.mode || self.timeout != actual.timeout {
            return false;
        }
        if self.mode != FailoverMode::Stateful {
            return true;
        }

        self.state_provider == actual.state_provider
            && self.fencing_enabled == actual.fencing_enabled
            && self.fencing_timeout == actual.fencing_timeout
            && self.fencing_pause == actual.fencing_pause
            && match self.state_provider {
                Some(FailoverStateProvider::Etcd2) => self.etcd2_params == actual.etcd2_params,
                Some(FailoverStateProvider::Stateboard) => {
                    self.stateboard_params == actual.stateboard_params
                }
                None => true,
            }
    }
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}
