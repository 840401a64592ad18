//! Cluster pipeline.

use super::common::{GetLeader, GetRequestedObject, Info, ResetStatus, SetPhase};
use crate::controller::ControllerContext;
use crate::crd::{Cluster, ClusterPhase, FailoverMode, RolePhase, SecretReference, StateProvider};
use crate::error::{OperatorError, OperatorResult};
use crate::events::EventRecord;
use crate::labels;
use crate::reconciliation::{
    ClusterBound, ObjectKey, ReconcileContext, Reconcilable, Step, StepOutcome,
};
use crate::resources::ResourceStore;
use crate::step_try;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tarantool_topology::types::{Etcd2Params, StateboardParams};
use tarantool_topology::{FailoverParams, FailoverStateProvider, TopologyError};

/// State of a Cluster pass.
pub struct ClusterContext {
    key: ObjectKey,
    services: Arc<ControllerContext>,
    cluster: Option<Cluster>,
    leader: Option<Pod>,
}

impl ClusterContext {
    /// Creates the context of a pass over the Cluster `key`.
    pub fn new(key: ObjectKey, services: Arc<ControllerContext>) -> Self {
        Self {
            key,
            services,
            cluster: None,
            leader: None,
        }
    }
}

impl ReconcileContext for ClusterContext {
    type Object = Cluster;

    fn key(&self) -> &ObjectKey {
        &self.key
    }

    fn services(&self) -> &Arc<ControllerContext> {
        &self.services
    }

    fn object(&self) -> Option<&Cluster> {
        self.cluster.as_ref()
    }

    fn object_mut(&mut self) -> Option<&mut Cluster> {
        self.cluster.as_mut()
    }

    fn set_object(&mut self, obj: Cluster) {
        self.cluster = Some(obj);
    }
}

impl ClusterBound for ClusterContext {
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

/// Steps of a Cluster pass.
pub fn pipeline() -> Vec<Box<dyn Step<ClusterContext>>> {
    vec![
        Box::new(Info),
        Box::new(GetRequestedObject),
        Box::new(SetPhase(ClusterPhase::Pending)),
        Box::new(CheckDeletion),
        Box::new(ResetStatus),
        Box::new(SetPhase(ClusterPhase::SyncingService)),
        Box::new(SyncClusterWideService),
        Box::new(SetPhase(ClusterPhase::WaitingForRoles)),
        Box::new(WaitForRolesPhases(vec![
            RolePhase::WaitingForBootstrap,
            RolePhase::Ready,
        ])),
        Box::new(SetPhase(ClusterPhase::WaitingForLeader)),
        Box::new(GetLeader),
        Box::new(Bootstrap),
        Box::new(SetPhase(ClusterPhase::FailoverConfiguring)),
        Box::new(ConfigureFailover),
        Box::new(SetPhase(ClusterPhase::Ready)),
    ]
}

fn missing_cluster() -> StepOutcome {
    StepOutcome::Error(OperatorError::InvalidConfig("cluster is not loaded".into()))
}

fn missing_leader() -> StepOutcome {
    StepOutcome::Error(OperatorError::InvalidConfig("leader is not resolved".into()))
}

/// Ends the pass for a cluster being deleted.
pub struct CheckDeletion;

#[async_trait]
impl Step<ClusterContext> for CheckDeletion {
    fn name(&self) -> &'static str {
        "CheckDeletion"
    }

    async fn reconcile(&self, ctx: &mut ClusterContext) -> StepOutcome {
        match ctx.object() {
            Some(cluster) if cluster.is_deleting() => StepOutcome::Complete,
            _ => StepOutcome::Next,
        }
    }
}

/// Builds the headless service instances resolve each other through.
pub fn cluster_wide_service(cluster: &Cluster) -> Service {
    let selector = labels::cluster_selector(&cluster.name_any());
    let port = cluster.spec.listen_port;

    Service {
        metadata: ObjectMeta {
            name: Some(cluster.name_any()),
            namespace: cluster.namespace(),
            labels: Some(selector.clone()),
            owner_references: cluster.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector),
            ports: Some(vec![
                ServicePort {
                    name: Some("app".to_string()),
                    port,
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::Int(port)),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("app-udp".to_string()),
                    port,
                    protocol: Some("UDP".to_string()),
                    target_port: Some(IntOrString::Int(port)),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Copies the managed fields of `desired` into `existing`. Returns whether
/// anything changed.
fn sync_service(existing: &mut Service, desired: &Service) -> bool {
    let mut changed = false;
    let desired_spec = desired.spec.clone().unwrap_or_default();
    let spec = existing.spec.get_or_insert_with(Default::default);

    if spec.cluster_ip != desired_spec.cluster_ip {
        spec.cluster_ip = desired_spec.cluster_ip;
        changed = true;
    }
    if spec.publish_not_ready_addresses != desired_spec.publish_not_ready_addresses {
        spec.publish_not_ready_addresses = desired_spec.publish_not_ready_addresses;
        changed = true;
    }
    if spec.selector != desired_spec.selector {
        spec.selector = desired_spec.selector;
        changed = true;
    }

    let port_keys = |ports: &Option<Vec<ServicePort>>| {
        ports
            .iter()
            .flatten()
            .map(|p| (p.name.clone(), p.port, p.protocol.clone()))
            .collect::<Vec<_>>()
    };
    if port_keys(&spec.ports) != port_keys(&desired_spec.ports) {
        spec.ports = desired_spec.ports;
        changed = true;
    }

    if let Some(owner) = desired.owner_references().first() {
        let owners = existing.metadata.owner_references.get_or_insert_with(Vec::new);
        if !owners.iter().any(|o| o.uid == owner.uid) {
            owners.push(owner.clone());
            changed = true;
        }
    }

    changed
}

/// Keeps the cluster-wide headless service in place.
pub struct SyncClusterWideService;

#[async_trait]
impl Step<ClusterContext> for SyncClusterWideService {
    fn name(&self) -> &'static str {
        "SyncClusterWideService"
    }

    async fn reconcile(&self, ctx: &mut ClusterContext) -> StepOutcome {
        let Some(cluster) = ctx.object() else {
            return missing_cluster();
        };
        let desired = cluster_wide_service(cluster);
        let store = ctx.services.store.clone();
        let namespace = ctx.key.namespace.clone();
        let name = desired.name_any();

        match step_try!(store.get_service(&namespace, &name).await) {
            None => {
                tracing::info!(name = %name, namespace = %namespace, "Creating cluster-wide Service");
                step_try!(store.create_service(&desired).await);
            }
            Some(mut existing) => {
                if sync_service(&mut existing, &desired) {
                    tracing::info!(name = %name, namespace = %namespace, "Updating cluster-wide Service");
                    step_try!(store.replace_service(&existing).await);
                }
            }
        }

        StepOutcome::Next
    }
}

/// Waits until every role of the cluster reached one of the phases. The
/// role controller re-triggers the cluster when a role gets there.
pub struct WaitForRolesPhases(pub Vec<RolePhase>);

#[async_trait]
impl Step<ClusterContext> for WaitForRolesPhases {
    fn name(&self) -> &'static str {
        "WaitForRolesPhases"
    }

    async fn reconcile(&self, ctx: &mut ClusterContext) -> StepOutcome {
        let selector = labels::cluster_selector(&ctx.key.name);
        let roles = step_try!(
            ctx.services
                .store
                .list_roles(&ctx.key.namespace, &selector)
                .await
        );

        if roles.is_empty() {
            tracing::debug!(cluster = %ctx.key.name, "Cluster has no roles yet");
            return StepOutcome::Complete;
        }

        let pending: Vec<String> = roles
            .iter()
            .filter(|role| !self.0.contains(&role.phase()))
            .map(|role| role.name_any())
            .collect();
        if !pending.is_empty() {
            tracing::debug!(cluster = %ctx.key.name, roles = ?pending, "Waiting for roles");
            return StepOutcome::Complete;
        }

        StepOutcome::Next
    }
}

fn is_missing_vshard_remotes(err: &TopologyError) -> bool {
    err.lua_error().is_some_and(|lua| {
        lua.err
            .contains("No remotes with role \"vshard-router\" available")
            || lua
                .err
                .contains("No remotes with role \"vshard-storage\" available")
    })
}

/// Bootstraps vshard once.
pub struct Bootstrap;

#[async_trait]
impl Step<ClusterContext> for Bootstrap {
    fn name(&self) -> &'static str {
        "Bootstrap"
    }

    async fn reconcile(&self, ctx: &mut ClusterContext) -> StepOutcome {
        let Some(cluster) = ctx.cluster.as_mut() else {
            return missing_cluster();
        };
        if cluster.is_bootstrapped() {
            return StepOutcome::Next;
        }
        let Some(leader) = ctx.leader.as_ref() else {
            return missing_leader();
        };

        let events = ctx.services.events.clone();
        match ctx.services.topology.bootstrap_vshard(leader).await {
            Ok(()) => {
                cluster.mark_bootstrapped();
                tracing::info!(cluster = %cluster.name_any(), "vshard bootstrapped");
                events
                    .record(
                        cluster.object_ref(&()),
                        EventRecord::normal("Bootstrapped", "Bootstrapped successfully."),
                    )
                    .await;
                StepOutcome::Next
            }
            Err(err) if is_missing_vshard_remotes(&err) => {
                tracing::warn!(cluster = %cluster.name_any(), error = %err, "Unable to bootstrap vshard");
                events
                    .record(
                        cluster.object_ref(&()),
                        EventRecord::warning("UnableToBootstrap", err.to_string()),
                    )
                    .await;
                cluster.set_phase(ClusterPhase::UnableToBootstrap);
                StepOutcome::Complete
            }
            Err(err) => StepOutcome::Error(err.into()),
        }
    }
}

async fn read_password(
    store: &dyn ResourceStore,
    cluster_namespace: &str,
    reference: &SecretReference,
    default_key: &str,
) -> OperatorResult<String> {
    let namespace = reference.namespace.as_deref().unwrap_or(cluster_namespace);
    let key = reference.key.as_deref().unwrap_or(default_key);

    let secret = store
        .get_secret(namespace, &reference.name)
        .await?
        .ok_or_else(|| OperatorError::not_found("Secret", namespace, &reference.name))?;

    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| {
            OperatorError::InvalidConfig(format!(
                "secret {namespace}/{} has no key {key}",
                reference.name
            ))
        })?;

    String::from_utf8(value.0.clone()).map_err(|_| {
        OperatorError::InvalidConfig(format!(
            "secret {namespace}/{} key {key} is not valid UTF-8",
            reference.name
        ))
    })
}

async fn optional_password(
    store: &dyn ResourceStore,
    cluster_namespace: &str,
    reference: Option<&SecretReference>,
    default_key: &str,
) -> OperatorResult<String> {
    match reference {
        Some(reference) => read_password(store, cluster_namespace, reference, default_key).await,
        None => Ok(String::new()),
    }
}

/// Failover parameters a cluster asks for, with passwords resolved.
pub async fn desired_failover_params(
    store: &dyn ResourceStore,
    cluster: &Cluster,
) -> OperatorResult<FailoverParams> {
    let spec = &cluster.spec.failover;
    let namespace = cluster.namespace().unwrap_or_default();

    let mut params = FailoverParams {
        mode: match spec.mode {
            FailoverMode::Disabled => tarantool_topology::FailoverMode::Disabled,
            FailoverMode::Eventual => tarantool_topology::FailoverMode::Eventual,
            FailoverMode::Stateful => tarantool_topology::FailoverMode::Stateful,
            FailoverMode::Raft => tarantool_topology::FailoverMode::Raft,
        },
        timeout: spec.timeout,
        ..Default::default()
    };

    if spec.mode != FailoverMode::Stateful {
        return Ok(params);
    }

    params.fencing_enabled = spec.fencing;
    params.fencing_timeout = spec.fencing_timeout;
    params.fencing_pause = spec.fencing_pause;

    match spec.state_provider {
        Some(StateProvider::Etcd2) => {
            let etcd2 = spec.etcd2.as_ref().ok_or_else(|| {
                OperatorError::InvalidConfig("etcd2 state provider requires etcd2 settings".into())
            })?;
            params.state_provider = Some(FailoverStateProvider::Etcd2);
            params.etcd2_params = Some(Etcd2Params {
                endpoints: etcd2.endpoints.clone(),
                username: etcd2.username.clone(),
                password: optional_password(
                    store,
                    &namespace,
                    etcd2.password.as_ref(),
                    "etcd2-password",
                )
                .await?,
                lock_delay: etcd2.lock_delay,
                prefix: etcd2.prefix.clone(),
            });
        }
        Some(StateProvider::Stateboard) => {
            let stateboard = spec.stateboard.as_ref().ok_or_else(|| {
                OperatorError::InvalidConfig(
                    "stateboard state provider requires stateboard settings".into(),
                )
            })?;
            params.state_provider = Some(FailoverStateProvider::Stateboard);
            params.stateboard_params = Some(StateboardParams {
                uri: stateboard.uri.clone(),
                password: optional_password(
                    store,
                    &namespace,
                    stateboard.password.as_ref(),
                    "stateboard-password",
                )
                .await?,
            });
        }
        None => {
            return Err(OperatorError::InvalidConfig(
                "stateful failover requires a state provider".into(),
            ));
        }
    }

    Ok(params)
}

/// Applies failover parameters when they differ from the running ones.
pub struct ConfigureFailover;

#[async_trait]
impl Step<ClusterContext> for ConfigureFailover {
    fn name(&self) -> &'static str {
        "ConfigureFailover"
    }

    async fn reconcile(&self, ctx: &mut ClusterContext) -> StepOutcome {
        let Some(cluster) = ctx.cluster.as_ref() else {
            return missing_cluster();
        };
        let Some(leader) = ctx.leader.as_ref() else {
            return missing_leader();
        };
        let services = &ctx.services;

        let desired = step_try!(desired_failover_params(services.store.as_ref(), cluster).await);
        let actual = step_try!(services.topology.failover_params(leader).await);
        if desired.is_satisfied_by(&actual) {
            return StepOutcome::Next;
        }

        tracing::info!(cluster = %cluster.name_any(), mode = ?desired.mode, "Applying failover parameters");
        step_try!(services.topology.set_failover_params(leader, &desired).await);
        StepOutcome::Next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ClusterSpec;

    fn cluster() -> Cluster {
        let mut cluster = Cluster::new(
            "tarantool",
            ClusterSpec {
                domain: "cluster.local".into(),
                listen_port: 3301,
                failover: Default::default(),
                foreign_leader: None,
            },
        );
        cluster.metadata.namespace = Some("db".into());
        cluster.metadata.uid = Some("cluster-uid".into());
        cluster
    }

    #[test]
    fn service_is_headless() {
        let service = cluster_wide_service(&cluster());
        let spec = service.spec.as_ref().expect("spec");

        assert_eq!(service.name_any(), "tarantool");
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        let ports = spec.ports.as_ref().expect("ports");
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[1].protocol.as_deref(), Some("UDP"));
        assert_eq!(service.owner_references().len(), 1);
    }

    #[test]
    fn service_sync_detects_drift() {
        let desired = cluster_wide_service(&cluster());
        let mut existing = desired.clone();
        assert!(!sync_service(&mut existing, &desired));

        if let Some(spec) = existing.spec.as_mut() {
            spec.publish_not_ready_addresses = Some(false);
            spec.ports = None;
        }
        assert!(sync_service(&mut existing, &desired));
        assert_eq!(existing.spec, desired.spec);
    }
}
