//! Cartridge administration operations.
//!
//! Every operation targets a single instance, normally the topology leader,
//! and is safe to repeat.

use crate::error::{Result, TopologyError};
use crate::transport::Transport;
use crate::types::{
    BooleanResult, CartridgeConfigData, EditReplicasetParams, EditTopologyParams, FailoverParams,
    JoinOutcome, JoinRequest, JoinServerParams, LuaError, RolesHierarchy,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

/// Sections of the clusterwide config owned by Cartridge itself.
pub const RESERVED_CONFIG_SECTIONS: &[&str] = &[
    "auth",
    "auth.yml",
    "topology",
    "topology.yml",
    "users_acl",
    "users_acl.yml",
    "vshard",
    "vshard.yml",
    "vshard_groups",
    "vshard_groups.yml",
    "schema.yml",
];

const INSTANCE_UUID_LUA: &str = r#"
    if type(box.cfg) == 'function' then
        return ""
    end

    return box.info().uuid
"#;

const SET_WEIGHT_LUA: &str = r#"
    local cartridge = require('cartridge')
    local uuid, weight = ...

    local replicaset = cartridge.admin_get_replicasets(uuid)[1]
    local actual_weight = 0

    if replicaset ~= nil and replicaset.weight ~= nil and replicaset.weight ~= box.NULL then
        actual_weight = replicaset.weight
    end

    if replicaset == nil or actual_weight ~= weight then
        local _, err = cartridge.admin_edit_topology({
            replicasets = {
                { uuid = uuid, weight = weight }
            }
        })
        if err ~= nil then
            return { res = false, err = err }
        end
    end

    return { res = true, err = nil }
"#;

const GET_REPLICASET_ROLES_LUA: &str = r#"
    local args = ...
    local cartridge = require('cartridge')
    local res = cartridge.admin_get_replicasets(args.uuid)
    if res[1] ~= nil then
        return res[1].roles
    end
    return nil
"#;

const BOOTSTRAP_VSHARD_LUA: &str = r#"
    local cartridge = require('cartridge')
    local res, err = cartridge.admin_bootstrap_vshard()
    return { res = res, err = err }
"#;

const ROLES_HIERARCHY_LUA: &str = r#"
    local roles = require('cartridge.roles')
    local hierarchy = {}

    for _, role_name in pairs(roles.get_all_roles()) do
        hierarchy[role_name] = roles.get_role_dependencies(role_name)
    end

    return hierarchy
"#;

const EDIT_TOPOLOGY_LUA: &str = r#"
    local args = ...
    local cartridge = require('cartridge')
    local topology, err = cartridge.admin_edit_topology(args)
    return { res = topology ~= nil, err = err }
"#;

const SET_FAILOVER_PARAMS_LUA: &str = r#"
    local cartridge = require('cartridge')
    local res, err = cartridge.failover_set_params(...)

    return { res = res, err = err }
"#;

const GET_FAILOVER_PARAMS_LUA: &str = r#"
    local cartridge = require('cartridge')
    return cartridge.failover_get_params()
"#;

const GET_CONFIG_LUA: &str = r#"
    local cartridge = require('cartridge')
    local reserved = ...
    local cfg = cartridge.config_get_readonly()

    local ret = {}
    for section, data in pairs(cfg) do
        if not reserved[section] then
            ret[section] = data
        end
    end
    return ret
"#;

const APPLY_CONFIG_LUA: &str = r#"
    local cartridge = require('cartridge')
    local desired, reserved = ...

    local safe = {}
    for section, data in pairs(desired) do
        if not reserved[section] then
            safe[section] = data
        end
    end

    return cartridge.config_patch_clusterwide(safe)
"#;

const IS_STARTED_LUA: &str = r#"
    local confapplier = require('cartridge.confapplier')
    local state = confapplier.get_state()

    if state == '' then
        return { res = false, err = nil }
    end

    if state == 'InitError' or state == 'BootError' or state == 'OperationError' or state == 'ReloadError' then
        return { res = false, err = nil }
    end

    return { res = true, err = nil }
"#;

const IS_CONFIGURED_LUA: &str = r#"
    local confapplier = require('cartridge.confapplier')
    local state = confapplier.get_state()

    if state ~= 'RolesConfigured' and state ~= 'OperationError' then
        return { res = false, err = nil }
    end

    return { res = true, err = nil }
"#;

/// Administrative operations on a Cartridge cluster.
#[async_trait]
pub trait Topology: Send + Sync {
    /// Joins instances, identified by advertise URI, into a replicaset.
    async fn join(
        &self,
        leader: &Pod,
        replicaset: &JoinRequest,
        advertise_uris: &[String],
    ) -> Result<JoinOutcome>;

    /// UUID of the instance, empty until the instance is part of a topology.
    async fn instance_uuid(&self, pod: &Pod) -> Result<String>;

    /// Sets vshard weight of a replicaset.
    async fn set_weight(&self, leader: &Pod, replicaset_uuid: &str, weight: i32) -> Result<()>;

    /// Roles currently enabled on a replicaset.
    async fn replicaset_roles(&self, leader: &Pod, replicaset_uuid: &str) -> Result<Vec<String>>;

    /// Replaces the roles enabled on a replicaset.
    async fn set_replicaset_roles(
        &self,
        leader: &Pod,
        replicaset_uuid: &str,
        roles: &[String],
    ) -> Result<()>;

    /// Bootstraps vshard. Succeeds when it is already bootstrapped.
    async fn bootstrap_vshard(&self, leader: &Pod) -> Result<()>;

    /// Every known role with the roles it depends on.
    async fn roles_hierarchy(&self, leader: &Pod) -> Result<RolesHierarchy>;

    /// Applies clusterwide failover parameters.
    async fn set_failover_params(&self, leader: &Pod, params: &FailoverParams) -> Result<()>;

    /// Current clusterwide failover parameters.
    async fn failover_params(&self, leader: &Pod) -> Result<FailoverParams>;

    /// Clusterwide config without the reserved sections.
    async fn cartridge_config(&self, leader: &Pod) -> Result<CartridgeConfigData>;

    /// Patches the clusterwide config, ignoring reserved sections.
    async fn apply_cartridge_config(&self, leader: &Pod, config: &CartridgeConfigData)
    -> Result<()>;

    /// Whether Cartridge has started on the instance.
    async fn is_cartridge_started(&self, pod: &Pod) -> Result<bool>;

    /// Whether the instance has applied its roles.
    async fn is_cartridge_configured(&self, pod: &Pod) -> Result<bool>;
}

/// [`Topology`] implemented with Lua scripts sent over a [`Transport`].
#[derive(Clone)]
pub struct CartridgeTopology {
    transport: Arc<dyn Transport>,
}

impl CartridgeTopology {
    /// Creates a driver on top of a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn call<T: DeserializeOwned>(&self, pod: &Pod, script: &str, args: &[Value]) -> Result<T> {
        let value = self.transport.exec(pod, script, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn edit_topology(&self, leader: &Pod, params: &EditTopologyParams) -> Result<bool> {
        let res: BooleanResult = self
            .call(leader, EDIT_TOPOLOGY_LUA, &[to_arg(params)?])
            .await?;

        match res.err {
            Some(err) => Err(TopologyError::lua("unable to edit topology", err)),
            None => Ok(res.res),
        }
    }
}

#[async_trait]
impl Topology for CartridgeTopology {
    async fn join(
        &self,
        leader: &Pod,
        replicaset: &JoinRequest,
        advertise_uris: &[String],
    ) -> Result<JoinOutcome> {
        let params = EditTopologyParams {
            replicasets: vec![EditReplicasetParams {
                uuid: replicaset.uuid.clone(),
                alias: replicaset.alias.clone(),
                roles: replicaset.roles.clone(),
                weight: replicaset.weight,
                vshard_group: replicaset.vshard_group.clone(),
                all_rw: replicaset.all_rw,
                join_servers: advertise_uris
                    .iter()
                    .map(|uri| JoinServerParams {
                        uri: uri.clone(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        };

        match self.edit_topology(leader, &params).await {
            Ok(true) => Ok(JoinOutcome::Joined),
            Ok(false) => Err(TopologyError::TopologyIsDown),
            Err(TopologyError::Lua { source, .. }) if source.err.contains("is already joined") => {
                Ok(JoinOutcome::AlreadyJoined)
            }
            Err(TopologyError::Lua { source, .. })
                if source.err.contains("can not enable unknown role") =>
            {
                Err(TopologyError::UnknownRole(source))
            }
            Err(err) => Err(err),
        }
    }

    async fn instance_uuid(&self, pod: &Pod) -> Result<String> {
        self.call(pod, INSTANCE_UUID_LUA, &[]).await
    }

    async fn set_weight(&self, leader: &Pod, replicaset_uuid: &str, weight: i32) -> Result<()> {
        let res: BooleanResult = self
            .call(leader, SET_WEIGHT_LUA, &[json!(replicaset_uuid), json!(weight)])
            .await?;

        let Some(err) = res.err else {
            return Ok(());
        };

        let message = err.to_string();
        if message.contains("not in config") {
            return Err(TopologyError::NotInConfig);
        }
        if message.contains("At least one vshard-storage (default) must have weight > 0") {
            return Err(TopologyError::LastStorageWeight);
        }

        Err(TopologyError::lua("unable to set weight", err))
    }

    async fn replicaset_roles(&self, leader: &Pod, replicaset_uuid: &str) -> Result<Vec<String>> {
        let roles: Option<Vec<String>> = self
            .call(
                leader,
                GET_REPLICASET_ROLES_LUA,
                &[json!({ "uuid": replicaset_uuid })],
            )
            .await?;

        Ok(roles.unwrap_or_default())
    }

    async fn set_replicaset_roles(
        &self,
        leader: &Pod,
        replicaset_uuid: &str,
        roles: &[String],
    ) -> Result<()> {
        let params = EditTopologyParams {
            replicasets: vec![EditReplicasetParams {
                uuid: replicaset_uuid.to_string(),
                roles: roles.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };

        if self.edit_topology(leader, &params).await? {
            Ok(())
        } else {
            Err(TopologyError::TopologyIsDown)
        }
    }

    async fn bootstrap_vshard(&self, leader: &Pod) -> Result<()> {
        let res: LuaCallOption = self.call(leader, BOOTSTRAP_VSHARD_LUA, &[]).await?;

        match res.err {
            Some(err) if is_already_bootstrapped(&err) => Ok(()),
            Some(err) => Err(TopologyError::lua("unable to bootstrap cluster", err)),
            None => Ok(()),
        }
    }

    async fn roles_hierarchy(&self, leader: &Pod) -> Result<RolesHierarchy> {
        self.call(leader, ROLES_HIERARCHY_LUA, &[]).await
    }

    async fn set_failover_params(&self, leader: &Pod, params: &FailoverParams) -> Result<()> {
        let res: LuaCallOption = self
            .call(leader, SET_FAILOVER_PARAMS_LUA, &[to_arg(params)?])
            .await?;

        match res.err {
            Some(err) => Err(TopologyError::lua("unable to set failover params", err)),
            None => Ok(()),
        }
    }

    async fn failover_params(&self, leader: &Pod) -> Result<FailoverParams> {
        self.call(leader, GET_FAILOVER_PARAMS_LUA, &[]).await
    }

    async fn cartridge_config(&self, leader: &Pod) -> Result<CartridgeConfigData> {
        // An empty Lua table is encoded as a JSON array, which is not a map.
        match self
            .call::<CartridgeConfigData>(leader, GET_CONFIG_LUA, &[reserved_sections()])
            .await
        {
            Ok(config) => Ok(config),
            Err(TopologyError::Decode(err)) => {
                tracing::debug!(error = %err, "Clusterwide config is not a map, treating as empty");
                Ok(CartridgeConfigData::new())
            }
            Err(err) => Err(err),
        }
    }

    async fn apply_cartridge_config(
        &self,
        leader: &Pod,
        config: &CartridgeConfigData,
    ) -> Result<()> {
        let applied: Option<bool> = self
            .call(
                leader,
                APPLY_CONFIG_LUA,
                &[Value::Object(config.clone()), reserved_sections()],
            )
            .await?;

        if applied == Some(true) {
            Ok(())
        } else {
            Err(TopologyError::ConfigRejected)
        }
    }

    async fn is_cartridge_started(&self, pod: &Pod) -> Result<bool> {
        let res: BooleanResult = self.call(pod, IS_STARTED_LUA, &[]).await?;
        match res.err {
            Some(err) => Err(TopologyError::lua("unable to retrieve instance state", err)),
            None => Ok(res.res),
        }
    }

    async fn is_cartridge_configured(&self, pod: &Pod) -> Result<bool> {
        let res: BooleanResult = self.call(pod, IS_CONFIGURED_LUA, &[]).await?;
        match res.err {
            Some(err) => Err(TopologyError::lua("unable to retrieve instance state", err)),
            None => Ok(res.res),
        }
    }
}

/// `{res, err}` envelope whose result is ignored.
type LuaCallOption = crate::types::LuaCallResult<Option<Value>>;

fn to_arg<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Reserved sections as a Lua set.
fn reserved_sections() -> Value {
    Value::Object(
        RESERVED_CONFIG_SECTIONS
            .iter()
            .map(|section| (section.to_string(), Value::Bool(true)))
            .collect(),
    )
}

fn is_already_bootstrapped(err: &LuaError) -> bool {
    err.class_name == "Bootstrapping vshard failed" && err.err.contains("already bootstrapped")
}

/// Removes reserved sections from a config document.
pub fn without_reserved_sections(config: &CartridgeConfigData) -> CartridgeConfigData {
    config
        .iter()
        .filter(|(section, _)| !RESERVED_CONFIG_SECTIONS.contains(&section.as_str()))
        .map(|(section, data)| (section.clone(), data.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_bootstrapped_detection() {
        let err = LuaError {
            class_name: "Bootstrapping vshard failed".into(),
            err: "Cluster is already bootstrapped".into(),
            ..Default::default()
        };
        assert!(is_already_bootstrapped(&err));

        let other = LuaError {
            class_name: "Bootstrapping vshard failed".into(),
            err: "No remotes with role \"vshard-router\" available".into(),
            ..Default::default()
        };
        assert!(!is_already_bootstrapped(&other));
    }

    #[test]
    fn reserved_sections_are_filtered() {
        let mut config = CartridgeConfigData::new();
        config.insert("topology".into(), json!({"replicasets": {}}));
        config.insert("vshard_groups.yml".into(), json!("default: {}"));
        config.insert("app".into(), json!({"key": "value"}));

        let safe = without_reserved_sections(&config);
        assert_eq!(safe.len(), 1);
        assert!(safe.contains_key("app"));
    }

    #[test]
    fn reserved_sections_argument_is_a_set() {
        let arg = reserved_sections();
        assert_eq!(arg["auth"], json!(true));
        assert_eq!(arg["schema.yml"], json!(true));
        assert!(arg.get("app").is_none());
    }
}
