//! Cluster controller.
//!
//! Keeps the cluster-wide service, elects the topology leader, bootstraps
//! vshard once every role is joined and applies failover settings.

use super::{ControllerContext, ReconcileAction, requeue_on_error};
use crate::crd::{Cluster, Role, RolePhase};
use crate::error::{OperatorError, OperatorResult};
use crate::labels;
use crate::reconciliation::{ObjectKey, Step, run};
use crate::steps::{ClusterContext, cluster};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use std::sync::Arc;

/// Controller for Cluster resources.
#[derive(Clone)]
pub struct ClusterController {
    ctx: Arc<ControllerContext>,
    steps: Arc<Vec<Box<dyn Step<ClusterContext>>>>,
}

impl ClusterController {
    /// Create a new cluster controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self {
            ctx,
            steps: Arc::new(cluster::pipeline()),
        }
    }

    /// Reconcile a Cluster resource.
    pub async fn reconcile(&self, cluster: Arc<Cluster>) -> OperatorResult<ReconcileAction> {
        let mut pass = ClusterContext::new(ObjectKey::of(cluster.as_ref()), self.ctx.clone());
        run(&mut pass, &self.steps).await.into_result()
    }
}

/// Maps a Role to its Cluster once the role waits for, or went past,
/// vshard bootstrap.
pub fn role_to_cluster(role: Role) -> Option<ObjectRef<Cluster>> {
    if !matches!(
        role.phase(),
        RolePhase::WaitingForBootstrap | RolePhase::Ready
    ) {
        return None;
    }

    let cluster = role.labels().get(labels::CLUSTER_NAME)?;
    let namespace = role.namespace()?;
    Some(ObjectRef::new(cluster).within(&namespace))
}

/// Handle errors during reconciliation.
pub fn error_policy(
    cluster: Arc<Cluster>,
    error: &OperatorError,
    _ctx: Arc<ControllerContext>,
) -> Action {
    tracing::error!(
        name = %cluster.name_any(),
        namespace = ?cluster.namespace(),
        error = %error,
        "Cluster reconciliation error"
    );
    requeue_on_error()
}
