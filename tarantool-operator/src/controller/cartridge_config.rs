//! CartridgeConfig controller.

use super::{ControllerContext, ReconcileAction, requeue_on_error};
use crate::crd::CartridgeConfig;
use crate::error::{OperatorError, OperatorResult};
use crate::reconciliation::{ObjectKey, Step, run};
use crate::steps::{ConfigContext, config};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::sync::Arc;

/// Controller for CartridgeConfig resources.
#[derive(Clone)]
pub struct CartridgeConfigController {
    ctx: Arc<ControllerContext>,
    steps: Arc<Vec<Box<dyn Step<ConfigContext>>>>,
}

impl CartridgeConfigController {
    /// Create a new config controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self {
            ctx,
            steps: Arc::new(config::pipeline()),
        }
    }

    /// Reconcile a CartridgeConfig resource.
    pub async fn reconcile(
        &self,
        config: Arc<CartridgeConfig>,
    ) -> OperatorResult<ReconcileAction> {
        let mut pass = ConfigContext::new(ObjectKey::of(config.as_ref()), self.ctx.clone());
        run(&mut pass, &self.steps).await.into_result()
    }
}

/// Handle errors during reconciliation.
pub fn error_policy(
    config: Arc<CartridgeConfig>,
    error: &OperatorError,
    _ctx: Arc<ControllerContext>,
) -> Action {
    tracing::error!(
        name = %config.name_any(),
        namespace = ?config.namespace(),
        error = %error,
        "CartridgeConfig reconciliation error"
    );
    requeue_on_error()
}
