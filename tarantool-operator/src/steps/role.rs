//! Role pipeline.
//!
//! A Role owns one StatefulSet per replicaset. Once its pods run Cartridge,
//! the pipeline joins them to the topology through the leader, keeps the
//! replicaset roles in line with the spec and, after vshard is bootstrapped,
//! sets the replicaset weights.

use super::common::{
    GetClusterByLabels, GetLeader, GetRequestedObject, Info, ResetStatus, SetPhase,
    WaitForClusterBootstrapped,
};
use crate::controller::ControllerContext;
use crate::crd::{Cluster, Role, RolePhase};
use crate::error::OperatorError;
use crate::events::EventRecord;
use crate::labels;
use crate::pods;
use crate::reconciliation::{
    ClusterBound, ObjectKey, ReconcileContext, Reconcilable, Step, StepOutcome,
};
use crate::replicasets::{ReplicasetManager, advertise_uri, replicaset_name, replicaset_uuid};
use crate::step_try;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tarantool_topology::roles::is_vshard_roles_equal;
use tarantool_topology::{JoinRequest, TopologyError};

/// State of a Role pass.
pub struct RoleContext {
    key: ObjectKey,
    services: Arc<ControllerContext>,
    role: Option<Role>,
    cluster: Option<Cluster>,
    leader: Option<Pod>,
}

impl RoleContext {
    /// Creates the context of a pass over the Role `key`.
    pub fn new(key: ObjectKey, services: Arc<ControllerContext>) -> Self {
        Self {
            key,
            services,
            role: None,
            cluster: None,
            leader: None,
        }
    }
}

impl ReconcileContext for RoleContext {
    type Object = Role;

    fn key(&self) -> &ObjectKey {
        &self.key
    }

    fn services(&self) -> &Arc<ControllerContext> {
        &self.services
    }

    fn object(&self) -> Option<&Role> {
        self.role.as_ref()
    }

    fn object_mut(&mut self) -> Option<&mut Role> {
        self.role.as_mut()
    }

    fn set_object(&mut self, obj: Role) {
        self.role = Some(obj);
    }
}

impl ClusterBound for RoleContext {
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

/// Steps of a Role pass.
pub fn pipeline() -> Vec<Box<dyn Step<RoleContext>>> {
    vec![
        Box::new(Info),
        Box::new(GetRequestedObject),
        Box::new(ResetStatus),
        Box::new(SetPhase(RolePhase::WaitingForCluster)),
        Box::new(GetClusterByLabels),
        Box::new(SetPhase(RolePhase::Pending)),
        Box::new(CreateStatefulSets),
        Box::new(UpdateStatefulSets),
        Box::new(SetPhase(RolePhase::WaitingForLeader)),
        Box::new(GetLeader),
        Box::new(SetPhase(RolePhase::WaitForCartridgeReady)),
        Box::new(EnsureCartridgeReady),
        Box::new(SetPhase(RolePhase::Joining)),
        Box::new(JoinInstances),
        Box::new(SetPhase(RolePhase::Configuring)),
        Box::new(ConfigureVShardRoles),
        Box::new(SetPhase(RolePhase::WaitingForBootstrap)),
        Box::new(WaitForClusterBootstrapped),
        Box::new(SetPhase(RolePhase::ConfiguringWeights)),
        Box::new(SetVShardWeights),
        Box::new(SetPhase(RolePhase::Ready)),
    ]
}

/// Role, cluster and leader of a pass, or the outcome ending it.
fn resolved(ctx: &RoleContext) -> Result<(&Role, &Cluster, &Pod), StepOutcome> {
    let missing = |what: &str| {
        StepOutcome::Error(OperatorError::InvalidConfig(format!("{what} is not resolved")))
    };
    let role = ctx.role.as_ref().ok_or_else(|| missing("role"))?;
    let cluster = ctx.cluster.as_ref().ok_or_else(|| missing("cluster"))?;
    let leader = ctx.leader.as_ref().ok_or_else(|| missing("leader"))?;
    Ok((role, cluster, leader))
}

/// Live StatefulSets of one replicaset.
async fn replicaset_stateful_sets(
    ctx: &RoleContext,
    role: &Role,
    cluster: &Cluster,
    ordinal: i32,
) -> Result<Vec<StatefulSet>, OperatorError> {
    let selector = labels::ordinal_selector(&cluster.name_any(), &role.name_any(), ordinal);
    let stateful_sets = ctx
        .services
        .store
        .list_stateful_sets(&ctx.key.namespace, &selector)
        .await?;
    Ok(stateful_sets
        .into_iter()
        .filter(|sts| sts.meta().deletion_timestamp.is_none())
        .collect())
}

/// Creates the StatefulSets of replicasets that have none.
pub struct CreateStatefulSets;

#[async_trait]
impl Step<RoleContext> for CreateStatefulSets {
    fn name(&self) -> &'static str {
        "CreateStatefulSets"
    }

    async fn reconcile(&self, ctx: &mut RoleContext) -> StepOutcome {
        let (Some(role), Some(cluster)) = (ctx.role.as_ref(), ctx.cluster.as_ref()) else {
            return StepOutcome::Complete;
        };
        if role.is_deleting() {
            return StepOutcome::Next;
        }

        step_try!(
            ReplicasetManager::new(ctx.services.store.as_ref())
                .create_stateful_sets(cluster, role)
                .await
        );
        StepOutcome::Next
    }
}

/// Brings existing StatefulSets in line with the role.
pub struct UpdateStatefulSets;

#[async_trait]
impl Step<RoleContext> for UpdateStatefulSets {
    fn name(&self) -> &'static str {
        "UpdateStatefulSets"
    }

    async fn reconcile(&self, ctx: &mut RoleContext) -> StepOutcome {
        let (Some(role), Some(cluster)) = (ctx.role.as_ref(), ctx.cluster.as_ref()) else {
            return StepOutcome::Complete;
        };

        step_try!(
            ReplicasetManager::new(ctx.services.store.as_ref())
                .update_stateful_sets(cluster, role)
                .await
        );
        StepOutcome::Next
    }
}

/// Waits until every expected instance of the role is up.
pub struct EnsureCartridgeReady;

#[async_trait]
impl Step<RoleContext> for EnsureCartridgeReady {
    fn name(&self) -> &'static str {
        "EnsureCartridgeReady"
    }

    async fn reconcile(&self, ctx: &mut RoleContext) -> StepOutcome {
        let (Some(role), Some(cluster)) = (ctx.role.as_ref(), ctx.cluster.as_ref()) else {
            return StepOutcome::Complete;
        };

        let selector = labels::role_selector(&cluster.name_any(), &role.name_any());
        let instances = step_try!(
            ctx.services
                .store
                .list_pods(&ctx.key.namespace, &selector)
                .await
        );

        let expected = role.expected_instances();
        let ready = instances
            .iter()
            .filter(|pod| !pods::is_deleting(pod) && pods::is_first_container_ready(pod))
            .count();

        if ready < usize::try_from(expected).unwrap_or_default() {
            tracing::info!(
                role = %role.name_any(),
                ready,
                expected,
                "Not all pods of role are running, waiting"
            );
            return StepOutcome::requeue();
        }

        StepOutcome::Next
    }
}

/// What joining one replicaset came to.
enum ReplicasetJoin {
    /// Every instance is part of the topology.
    Done,
    /// Some instances are not up yet, or the leader has no topology.
    Pending,
}

/// Joins instances that are not yet part of the topology, one replicaset
/// at a time.
pub struct JoinInstances;

impl JoinInstances {
    async fn join_replicaset(
        ctx: &RoleContext,
        role: &Role,
        cluster: &Cluster,
        leader: &Pod,
        ordinal: i32,
    ) -> Result<ReplicasetJoin, JoinError> {
        let topology = &ctx.services.topology;
        let mut uris = Vec::new();

        for stateful_set in replicaset_stateful_sets(ctx, role, cluster, ordinal).await? {
            for replica in 0..role.spec.replicaset_template.replicas {
                let name = labels::pod_name(&stateful_set.name_any(), replica);
                let pod = ctx.services.store.get_pod(&ctx.key.namespace, &name).await?;
                let Some(pod) = pod.filter(|pod| pods::is_running(pod) && !pods::is_deleting(pod))
                else {
                    tracing::debug!(pod = %name, "Instance is not running yet");
                    return Ok(ReplicasetJoin::Pending);
                };

                if topology.instance_uuid(&pod).await?.is_empty() {
                    uris.push(advertise_uri(cluster, &pod.name_any()));
                }
            }
        }

        if uris.is_empty() {
            return Ok(ReplicasetJoin::Done);
        }

        let leader_uri = advertise_uri(cluster, &leader.name_any());
        if !uris.contains(&leader_uri) && topology.instance_uuid(leader).await?.is_empty() {
            tracing::info!(
                leader = %leader.name_any(),
                "Leader is not part of a topology yet"
            );
            return Ok(ReplicasetJoin::Pending);
        }

        let request = JoinRequest {
            alias: replicaset_name(&role.name_any(), ordinal),
            uuid: replicaset_uuid(&role.name_any(), ordinal).to_string(),
            roles: role.spec.vshard.cluster_roles.clone(),
            weight: role.spec.vshard.weight,
            vshard_group: role.spec.vshard.vshard_group_name.clone(),
            all_rw: role.spec.all_rw,
        };

        tracing::info!(
            replicaset = %request.alias,
            instances = ?uris,
            "Joining instances"
        );
        topology.join(leader, &request, &uris).await?;
        Ok(ReplicasetJoin::Done)
    }
}

/// Error of a single replicaset join.
enum JoinError {
    Topology(TopologyError),
    Operator(OperatorError),
}

impl From<TopologyError> for JoinError {
    fn from(err: TopologyError) -> Self {
        Self::Topology(err)
    }
}

impl From<OperatorError> for JoinError {
    fn from(err: OperatorError) -> Self {
        Self::Operator(err)
    }
}

#[async_trait]
impl Step<RoleContext> for JoinInstances {
    fn name(&self) -> &'static str {
        "JoinInstances"
    }

    async fn reconcile(&self, ctx: &mut RoleContext) -> StepOutcome {
        let (role, cluster, leader) = match resolved(ctx) {
            Ok(resolved) => resolved,
            Err(outcome) => return outcome,
        };

        let role_name = role.name_any();
        let mut all_joined = true;
        let mut unknown_role = None;

        for ordinal in 0..role.spec.replicasets {
            match Self::join_replicaset(ctx, role, cluster, leader, ordinal).await {
                Ok(ReplicasetJoin::Done) => {}
                Ok(ReplicasetJoin::Pending) => all_joined = false,
                Err(JoinError::Topology(err @ TopologyError::UnknownRole(_))) => {
                    unknown_role = Some(err);
                    break;
                }
                Err(JoinError::Topology(err)) => {
                    tracing::error!(error = %err, "Unable to join instances");
                    return StepOutcome::Error(err.into());
                }
                Err(JoinError::Operator(err)) => return StepOutcome::Error(err),
            }
        }

        if let Some(err) = unknown_role {
            tracing::warn!(role = %role_name, error = %err, "Role requests unknown cluster roles");
            return stop_on_config_error(ctx, "WrongVShardRoles", &err).await;
        }

        if !all_joined {
            tracing::info!(role = %role_name, "Not all pods joined the cluster");
            return StepOutcome::requeue();
        }

        StepOutcome::Next
    }
}

/// Sets the cluster roles of every replicaset when they differ from the
/// role's vshard config, taking role dependencies into account.
pub struct ConfigureVShardRoles;

#[async_trait]
impl Step<RoleContext> for ConfigureVShardRoles {
    fn name(&self) -> &'static str {
        "ConfigureVShardRoles"
    }

    async fn reconcile(&self, ctx: &mut RoleContext) -> StepOutcome {
        let (role, cluster, leader) = match resolved(ctx) {
            Ok(resolved) => resolved,
            Err(outcome) => return outcome,
        };
        let topology = &ctx.services.topology;
        let desired = &role.spec.vshard.cluster_roles;
        let mut all_configured = true;

        for ordinal in 0..role.spec.replicasets {
            let stateful_sets = match replicaset_stateful_sets(ctx, role, cluster, ordinal).await {
                Ok(stateful_sets) => stateful_sets,
                Err(err) => {
                    tracing::warn!(ordinal, error = %err, "Unable to list replicaset StatefulSets");
                    all_configured = false;
                    continue;
                }
            };
            if stateful_sets.is_empty() {
                continue;
            }

            let uuid = replicaset_uuid(&role.name_any(), ordinal).to_string();
            let result = async {
                let hierarchy = topology.roles_hierarchy(leader).await?;
                let actual = topology.replicaset_roles(leader, &uuid).await?;
                if !is_vshard_roles_equal(&actual, desired, &hierarchy) {
                    tracing::info!(
                        replicaset = %uuid,
                        actual = ?actual,
                        desired = ?desired,
                        "Setting replicaset roles"
                    );
                    topology.set_replicaset_roles(leader, &uuid, desired).await?;
                }
                Ok::<_, TopologyError>(())
            }
            .await;

            if let Err(err) = result {
                tracing::warn!(replicaset = %uuid, error = %err, "Unable to configure replicaset roles");
                all_configured = false;
            }
        }

        if !all_configured {
            tracing::info!(role = %role.name_any(), "Not all vshard roles configured");
            return StepOutcome::requeue();
        }

        StepOutcome::Next
    }
}

/// Sets the vshard weight of every replicaset of the role.
pub struct SetVShardWeights;

#[async_trait]
impl Step<RoleContext> for SetVShardWeights {
    fn name(&self) -> &'static str {
        "SetVShardWeights"
    }

    async fn reconcile(&self, ctx: &mut RoleContext) -> StepOutcome {
        let (role, cluster, leader) = match resolved(ctx) {
            Ok(resolved) => resolved,
            Err(outcome) => return outcome,
        };
        let weight = role.spec.vshard.weight;
        let role_name = role.name_any();
        let mut refused = None;

        'replicasets: for ordinal in 0..role.spec.replicasets {
            for stateful_set in step_try!(replicaset_stateful_sets(ctx, role, cluster, ordinal).await)
            {
                let Some(uuid) = stateful_set.labels().get(labels::REPLICASET_UUID) else {
                    tracing::warn!(
                        name = %stateful_set.name_any(),
                        "StatefulSet has no replicaset UUID label, skipping"
                    );
                    continue;
                };
                match ctx.services.topology.set_weight(leader, uuid, weight).await {
                    Ok(()) => {}
                    Err(err @ TopologyError::LastStorageWeight) => {
                        refused = Some(err);
                        break 'replicasets;
                    }
                    Err(err) => return StepOutcome::Error(err.into()),
                }
            }
        }

        if let Some(err) = refused {
            tracing::warn!(role = %role_name, weight, error = %err, "Cartridge refused the vshard weight");
            return stop_on_config_error(ctx, "WrongVShardWeight", &err).await;
        }

        StepOutcome::Next
    }
}

/// Records a Warning event on the role and parks it in ConfigError until
/// its spec changes.
async fn stop_on_config_error(
    ctx: &mut RoleContext,
    reason: &str,
    err: &TopologyError,
) -> StepOutcome {
    let events = ctx.services.events.clone();
    let Some(role) = ctx.role.as_mut() else {
        return StepOutcome::Complete;
    };
    events
        .record(
            role.object_ref(&()),
            EventRecord::warning(reason, err.to_string()),
        )
        .await;
    role.set_phase(RolePhase::ConfigError);
    StepOutcome::Complete
}
