//! Steps shared by every pipeline.

use crate::crd::Cluster;
use crate::election::LeaderElection;
use crate::error::OperatorError;
use crate::labels;
use crate::reconciliation::{ClusterBound, Reconcilable, ReconcileContext, Step, StepOutcome};
use crate::step_try;
use async_trait::async_trait;
use kube::ResourceExt;

/// Logs the start of a pass.
pub struct Info;

#[async_trait]
impl<C: ReconcileContext> Step<C> for Info {
    fn name(&self) -> &'static str {
        "Info"
    }

    async fn reconcile(&self, ctx: &mut C) -> StepOutcome {
        let key = ctx.key();
        tracing::info!(
            kind = C::Object::KIND_NAME,
            name = %key.name,
            namespace = %key.namespace,
            "Reconciling"
        );
        StepOutcome::Next
    }
}

/// Loads the requested object. A vanished object ends the pass.
pub struct GetRequestedObject;

#[async_trait]
impl<C: ReconcileContext> Step<C> for GetRequestedObject {
    fn name(&self) -> &'static str {
        "GetRequestedObject"
    }

    async fn reconcile(&self, ctx: &mut C) -> StepOutcome {
        let key = ctx.key().clone();
        let services = ctx.services().clone();

        match C::Object::fetch(services.store.as_ref(), &key.namespace, &key.name).await {
            Ok(Some(obj)) => {
                ctx.set_object(obj);
                StepOutcome::Next
            }
            Ok(None) => {
                tracing::debug!(
                    kind = C::Object::KIND_NAME,
                    name = %key.name,
                    namespace = %key.namespace,
                    "Object is gone"
                );
                StepOutcome::Complete
            }
            Err(err) => StepOutcome::Error(err),
        }
    }
}

/// Sets the phase of the requested object.
pub struct SetPhase<P>(pub P);

#[async_trait]
impl<C, P> Step<C> for SetPhase<P>
where
    C: ReconcileContext,
    C::Object: Reconcilable<Phase = P>,
    P: Copy + std::fmt::Debug + Send + Sync,
{
    fn name(&self) -> &'static str {
        "SetPhase"
    }

    async fn reconcile(&self, ctx: &mut C) -> StepOutcome {
        if let Some(obj) = ctx.object_mut() {
            tracing::debug!(phase = ?self.0, "Setting phase");
            obj.set_phase(self.0);
        }
        StepOutcome::Next
    }
}

/// Clears the per-pass status of the requested object.
pub struct ResetStatus;

#[async_trait]
impl<C: ReconcileContext> Step<C> for ResetStatus {
    fn name(&self) -> &'static str {
        "ResetStatus"
    }

    async fn reconcile(&self, ctx: &mut C) -> StepOutcome {
        if let Some(obj) = ctx.object_mut() {
            obj.reset_status();
        }
        StepOutcome::Next
    }
}

/// Resolves the Cluster named by the object's cluster-name label.
pub struct GetClusterByLabels;

#[async_trait]
impl<C: ClusterBound> Step<C> for GetClusterByLabels {
    fn name(&self) -> &'static str {
        "GetClusterByLabels"
    }

    async fn reconcile(&self, ctx: &mut C) -> StepOutcome {
        if ctx.cluster().is_some() {
            return StepOutcome::Next;
        }

        let Some(obj) = ctx.object() else {
            return StepOutcome::Complete;
        };
        let Some(cluster_name) = obj.labels().get(labels::CLUSTER_NAME).cloned() else {
            return StepOutcome::Error(OperatorError::MissingLabel(
                labels::CLUSTER_NAME.to_string(),
            ));
        };

        let namespace = ctx.key().namespace.clone();
        let services = ctx.services().clone();
        match step_try!(services.store.get_cluster(&namespace, &cluster_name).await) {
            Some(cluster) => {
                ctx.set_cluster(cluster);
                StepOutcome::Next
            }
            None => {
                tracing::info!(
                    cluster = %cluster_name,
                    namespace = %namespace,
                    "Cluster not found, waiting"
                );
                StepOutcome::requeue()
            }
        }
    }
}

/// Resolves the topology leader, electing one when needed.
pub struct GetLeader;

#[async_trait]
impl<C: ClusterBound> Step<C> for GetLeader {
    fn name(&self) -> &'static str {
        "GetLeader"
    }

    async fn reconcile(&self, ctx: &mut C) -> StepOutcome {
        let services = ctx.services().clone();
        let Some(cluster) = ctx.cluster_mut() else {
            return StepOutcome::Error(OperatorError::InvalidConfig(
                "cluster is not resolved".into(),
            ));
        };

        let bootstrapped = cluster.is_bootstrapped();
        let cluster_name = cluster.name_any();

        match LeaderElection::new(&services).leader_for(cluster).await {
            Ok(leader) => {
                ctx.set_leader(leader);
                StepOutcome::Next
            }
            Err(OperatorError::LeaderElectionConflict) => StepOutcome::requeue(),
            Err(OperatorError::NoAvailableLeader) if !bootstrapped => {
                tracing::info!(
                    cluster = %cluster_name,
                    "No instance can lead the topology yet"
                );
                StepOutcome::requeue()
            }
            Err(err) => StepOutcome::Error(err),
        }
    }
}

/// Waits until vshard of the resolved cluster is bootstrapped.
pub struct WaitForClusterBootstrapped;

#[async_trait]
impl<C: ClusterBound> Step<C> for WaitForClusterBootstrapped {
    fn name(&self) -> &'static str {
        "WaitForClusterBootstrapped"
    }

    async fn reconcile(&self, ctx: &mut C) -> StepOutcome {
        if ctx.cluster().is_some_and(Cluster::is_bootstrapped) {
            StepOutcome::Next
        } else {
            StepOutcome::requeue()
        }
    }
}
