//! Role controller.

use super::{ControllerContext, ReconcileAction, requeue_on_error};
use crate::crd::Role;
use crate::error::{OperatorError, OperatorResult};
use crate::reconciliation::{ObjectKey, Step, run};
use crate::steps::{RoleContext, role};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::sync::Arc;

/// Controller for Role resources.
///
/// Manages the StatefulSets of every replicaset and drives their instances
/// into the Cartridge topology.
#[derive(Clone)]
pub struct RoleController {
    ctx: Arc<ControllerContext>,
    steps: Arc<Vec<Box<dyn Step<RoleContext>>>>,
}

impl RoleController {
    /// Create a new role controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self {
            ctx,
            steps: Arc::new(role::pipeline()),
        }
    }

    /// Reconcile a Role resource.
    pub async fn reconcile(&self, role: Arc<Role>) -> OperatorResult<ReconcileAction> {
        let mut pass = RoleContext::new(ObjectKey::of(role.as_ref()), self.ctx.clone());
        run(&mut pass, &self.steps).await.into_result()
    }
}

/// Handle errors during reconciliation.
pub fn error_policy(role: Arc<Role>, error: &OperatorError, _ctx: Arc<ControllerContext>) -> Action {
    tracing::error!(
        name = %role.name_any(),
        namespace = ?role.namespace(),
        error = %error,
        "Role reconciliation error"
    );
    requeue_on_error()
}
