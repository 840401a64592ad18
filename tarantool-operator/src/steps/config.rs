//! CartridgeConfig pipeline.

use super::common::{
    GetClusterByLabels, GetLeader, GetRequestedObject, Info, ResetStatus, SetPhase,
    WaitForClusterBootstrapped,
};
use crate::controller::ControllerContext;
use crate::crd::{CartridgeConfig, CartridgeConfigPhase, Cluster};
use crate::error::{OperatorError, OperatorResult};
use crate::reconciliation::{ClusterBound, ObjectKey, ReconcileContext, Step, StepOutcome};
use crate::step_try;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde_json::Value;
use std::sync::Arc;
use tarantool_topology::{CartridgeConfigData, without_reserved_sections};

/// State of a CartridgeConfig pass.
pub struct ConfigContext {
    key: ObjectKey,
    services: Arc<ControllerContext>,
    config: Option<CartridgeConfig>,
    cluster: Option<Cluster>,
    leader: Option<Pod>,
}

impl ConfigContext {
    /// Creates the context of a pass over the CartridgeConfig `key`.
    pub fn new(key: ObjectKey, services: Arc<ControllerContext>) -> Self {
        Self {
            key,
            services,
            config: None,
            cluster: None,
            leader: None,
        }
    }
}

impl ReconcileContext for ConfigContext {
    type Object = CartridgeConfig;

    fn key(&self) -> &ObjectKey {
        &self.key
    }

    fn services(&self) -> &Arc<ControllerContext> {
        &self.services
    }

    fn object(&self) -> Option<&CartridgeConfig> {
        self.config.as_ref()
    }

    fn object_mut(&mut self) -> Option<&mut CartridgeConfig> {
        self.config.as_mut()
    }

    fn set_object(&mut self, obj: CartridgeConfig) {
        self.config = Some(obj);
    }
}

impl ClusterBound for ConfigContext {
    fn cluster(&self) -> Option<&Cluster> {
        self.cluster.as_ref()
    }

    fn cluster_mut(&mut self) -> Option<&mut Cluster> {
        self.cluster.as_mut()
    }

    fn set_cluster(&mut self, cluster: Cluster) {
        self.cluster = Some(cluster);
    }

    fn leader(&self) -> Option<&Pod> {
        self.leader.as_ref()
    }

    fn set_leader(&mut self, leader: Pod) {
        self.leader = Some(leader);
    }
}

/// Steps of a CartridgeConfig pass.
pub fn pipeline() -> Vec<Box<dyn Step<ConfigContext>>> {
    vec![
        Box::new(Info),
        Box::new(GetRequestedObject),
        Box::new(ResetStatus),
        Box::new(SetPhase(CartridgeConfigPhase::WaitingForCluster)),
        Box::new(GetClusterByLabels),
        Box::new(WaitForClusterBootstrapped),
        Box::new(SetPhase(CartridgeConfigPhase::WaitingForLeader)),
        Box::new(GetLeader),
        Box::new(SetPhase(CartridgeConfigPhase::Applying)),
        Box::new(Configure),
        Box::new(SetPhase(CartridgeConfigPhase::Ready)),
    ]
}

/// Parses the YAML document of a CartridgeConfig. Reserved sections are
/// dropped since they are never applied.
pub fn desired_config(data: &str) -> OperatorResult<CartridgeConfigData> {
    if data.trim().is_empty() {
        return Ok(CartridgeConfigData::new());
    }

    match serde_yaml::from_str::<Value>(data)? {
        Value::Object(map) => Ok(without_reserved_sections(&map)),
        Value::Null => Ok(CartridgeConfigData::new()),
        other => Err(OperatorError::InvalidConfig(format!(
            "cartridge config must be a mapping, got {other}"
        ))),
    }
}

/// Whether every section of `desired` is present in `actual` with an equal
/// value.
pub fn is_subset(desired: &CartridgeConfigData, actual: &CartridgeConfigData) -> bool {
    desired
        .iter()
        .all(|(section, value)| actual.get(section) == Some(value))
}

/// Uploads the config when the cluster does not already carry it.
pub struct Configure;

#[async_trait]
impl Step<ConfigContext> for Configure {
    fn name(&self) -> &'static str {
        "Configure"
    }

    async fn reconcile(&self, ctx: &mut ConfigContext) -> StepOutcome {
        let Some(config) = ctx.config.as_ref() else {
            return StepOutcome::Complete;
        };
        let Some(leader) = ctx.leader.as_ref() else {
            return StepOutcome::Error(OperatorError::InvalidConfig(
                "leader is not resolved".into(),
            ));
        };
        let topology = &ctx.services.topology;

        let desired = step_try!(desired_config(&config.spec.data));
        let actual = step_try!(topology.cartridge_config(leader).await);

        if is_subset(&desired, &actual) {
            tracing::debug!(config = %config.name_any(), "Cartridge config is up to date");
            return StepOutcome::Next;
        }

        tracing::info!(
            config = %config.name_any(),
            sections = ?desired.keys().collect::<Vec<_>>(),
            "Applying cartridge config"
        );
        step_try!(topology.apply_cartridge_config(leader, &desired).await);
        StepOutcome::Next
    }
}
