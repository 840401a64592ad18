//! Topology leader election.
//!
//! Every admin call goes through one instance, the topology leader. The
//! leader is recorded in the Cluster status so that all controllers agree on
//! it, and it only changes when the recorded one is unusable.
//!
//! Before vshard is bootstrapped a lost leader is not replaced: the new
//! leader would start a second, independent topology.

use crate::controller::ControllerContext;
use crate::crd::{Cluster, Role};
use crate::error::{OperatorError, OperatorResult};
use crate::events::EventRecord;
use crate::labels;
use crate::pods;
use crate::replicasets::replicaset_name;
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};

/// Elects and validates the topology leader of a cluster.
pub struct LeaderElection<'a> {
    ctx: &'a ControllerContext,
}

impl<'a> LeaderElection<'a> {
    /// Creates an election over the controller's dependencies.
    pub fn new(ctx: &'a ControllerContext) -> Self {
        Self { ctx }
    }

    /// Returns the usable leader of `cluster`, electing one when needed.
    ///
    /// When a new leader is recorded `cluster` is replaced by the stored
    /// object.
    pub async fn leader_for(&self, cluster: &mut Cluster) -> OperatorResult<Pod> {
        let Some(current) = cluster.leader().map(str::to_string) else {
            return self.elect(cluster, None).await;
        };

        match self.check_leader(cluster, &current).await {
            Ok(pod) => Ok(pod),
            Err(OperatorError::LeaderNotReady { leader })
                if cluster.is_bootstrapped() && !has_foreign_leader(cluster) =>
            {
                tracing::warn!(
                    cluster = %cluster.name_any(),
                    leader = %leader,
                    "Topology leader is not ready, electing a new one"
                );
                self.elect(cluster, Some(&leader)).await
            }
            Err(err) => Err(err),
        }
    }

    /// Whether `pod` is the recorded leader of `cluster`.
    pub fn is_leader(cluster: &Cluster, pod: &Pod) -> bool {
        cluster.leader() == Some(pod.name_any().as_str())
    }

    async fn check_leader(&self, cluster: &Cluster, leader: &str) -> OperatorResult<Pod> {
        let namespace = cluster.namespace().unwrap_or_default();
        let not_ready = || OperatorError::LeaderNotReady {
            leader: leader.to_string(),
        };

        let pod = self
            .ctx
            .store
            .get_pod(&namespace, leader)
            .await?
            .ok_or_else(not_ready)?;

        if self.can_be_leader(cluster, &pod).await? {
            Ok(pod)
        } else {
            Err(not_ready())
        }
    }

    async fn elect(&self, cluster: &mut Cluster, previous: Option<&str>) -> OperatorResult<Pod> {
        let namespace = cluster.namespace().unwrap_or_default();
        let cluster_name = cluster.name_any();

        let roles = self
            .ctx
            .store
            .list_roles(&namespace, &labels::cluster_selector(&cluster_name))
            .await?;

        let leader = self
            .find_candidate(cluster, &namespace, &roles, previous)
            .await?
            .ok_or(OperatorError::NoAvailableLeader)?;
        let leader_name = leader.name_any();

        let before = cluster.status.clone();
        cluster.set_leader(leader_name.clone());

        match self.ctx.store.replace_cluster_status(cluster).await {
            Ok(updated) => *cluster = updated,
            Err(err) => {
                cluster.status = before;
                return Err(if err.is_conflict() {
                    OperatorError::LeaderElectionConflict
                } else {
                    err
                });
            }
        }

        tracing::info!(
            cluster = %cluster_name,
            namespace = %namespace,
            leader = %leader_name,
            "New topology leader elected"
        );
        self.ctx
            .events
            .record(
                cluster.object_ref(&()),
                EventRecord::normal(
                    "NewTopologyLeaderElected",
                    format!("Pod {leader_name} is a new topology leader"),
                ),
            )
            .await;

        Ok(leader)
    }

    /// Walks instances ordinal by ordinal so that the first instance of the
    /// first replicaset of every role is tried before any second instance.
    async fn find_candidate(
        &self,
        cluster: &Cluster,
        namespace: &str,
        roles: &[Role],
        previous: Option<&str>,
    ) -> OperatorResult<Option<Pod>> {
        let max_replicasets = roles.iter().map(|r| r.spec.replicasets).max().unwrap_or(0);
        let max_replicas = roles
            .iter()
            .map(|r| r.spec.replicaset_template.replicas)
            .max()
            .unwrap_or(0);

        for replica in 0..max_replicas {
            for replicaset in 0..max_replicasets {
                for role in roles {
                    if replicaset >= role.spec.replicasets
                        || replica >= role.spec.replicaset_template.replicas
                    {
                        continue;
                    }

                    let name =
                        labels::pod_name(&replicaset_name(&role.name_any(), replicaset), replica);
                    if previous == Some(name.as_str()) {
                        continue;
                    }

                    let Some(pod) = self.ctx.store.get_pod(namespace, &name).await? else {
                        continue;
                    };

                    match self.can_be_leader(cluster, &pod).await {
                        Ok(true) => return Ok(Some(pod)),
                        Ok(false) => {}
                        Err(err) => {
                            tracing::debug!(pod = %name, error = %err, "Skipping unreachable candidate");
                        }
                    }
                }
            }
        }

        Ok(None)
    }

    /// Whether `pod` can serve admin calls. An unreachable instance is an
    /// error, not a "no", so a slow exec never moves leadership.
    async fn can_be_leader(&self, cluster: &Cluster, pod: &Pod) -> OperatorResult<bool> {
        if pods::is_deleting(pod) || !pods::is_running(pod) {
            return Ok(false);
        }

        let probe = if cluster.is_bootstrapped() {
            self.ctx.topology.is_cartridge_configured(pod).await
        } else {
            self.ctx.topology.is_cartridge_started(pod).await
        };

        match probe {
            Ok(ready) => Ok(ready),
            Err(err) if err.is_transport() => Err(err.into()),
            Err(err) => {
                tracing::debug!(pod = %pod.name_any(), error = %err, "Instance state probe failed");
                Ok(false)
            }
        }
    }
}

fn has_foreign_leader(cluster: &Cluster) -> bool {
    cluster
        .spec
        .foreign_leader
        .as_deref()
        .is_some_and(|leader| !leader.is_empty())
}
