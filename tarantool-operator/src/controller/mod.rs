//! Kubernetes controllers for Tarantool resources.
//!
//! - [`ClusterController`]: Manages Cluster resources
//! - [`RoleController`]: Manages Role resources
//! - [`CartridgeConfigController`]: Manages CartridgeConfig resources
//!
//! Each controller runs its pipeline of steps through
//! [`crate::reconciliation::run`].
//!
//! # Usage with kube-runtime
//!
//! ```ignore
//! use tarantool_operator::controller::{ClusterController, cluster_error_policy};
//!
//! Controller::new(clusters, watcher_config)
//!     .run(|cluster, ctx| async move {
//!         let controller = ClusterController::new(ctx.clone());
//!         controller.reconcile(cluster).await.map(Action::from)
//!     }, cluster_error_policy, context)
//!     .for_each(|_| futures::future::ready(()))
//!     .await;
//! ```

mod cartridge_config;
mod cluster;
mod role;

pub use cartridge_config::{
    CartridgeConfigController, error_policy as cartridge_config_error_policy,
};
pub use cluster::{ClusterController, error_policy as cluster_error_policy, role_to_cluster};
pub use role::{RoleController, error_policy as role_error_policy};

use crate::config::OperatorConfig;
use crate::events::{EventRecorder, KubeEvents};
use crate::reconciliation::ERROR_TIMEOUT;
use crate::resources::{KubeStore, ResourceStore};
use kube::runtime::controller::Action;
use std::sync::Arc;
use tarantool_topology::{CartridgeTopology, PodExec, Topology};

/// Name the operator reports events as.
pub const CONTROLLER_NAME: &str = "tarantool-operator";

/// Shared context for controllers.
pub struct ControllerContext {
    /// Kubernetes objects.
    pub store: Arc<dyn ResourceStore>,
    /// Cartridge admin API.
    pub topology: Arc<dyn Topology>,
    /// Event sink.
    pub events: Arc<dyn EventRecorder>,
}

impl ControllerContext {
    /// Create a new controller context.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        topology: Arc<dyn Topology>,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            store,
            topology,
            events,
        }
    }

    /// Create a context talking to a live cluster.
    pub fn from_client(client: kube::Client, config: &OperatorConfig) -> Self {
        let transport = PodExec::new(client.clone())
            .with_container(config.container_name.clone())
            .with_timeout(config.exec_timeout);

        Self::new(
            Arc::new(KubeStore::new(client.clone())),
            Arc::new(CartridgeTopology::new(Arc::new(transport))),
            Arc::new(KubeEvents::new(client, CONTROLLER_NAME)),
        )
    }
}

/// Result type for reconciliation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Requeue after the specified duration.
    Requeue(std::time::Duration),
    /// Don't requeue (reconciliation complete).
    Done,
}

impl From<ReconcileAction> for Action {
    fn from(action: ReconcileAction) -> Self {
        match action {
            ReconcileAction::Requeue(after) => Action::requeue(after),
            ReconcileAction::Done => Action::await_change(),
        }
    }
}

fn requeue_on_error() -> Action {
    Action::requeue(ERROR_TIMEOUT)
}
