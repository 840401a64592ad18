//! Stepped reconciliation.
//!
//! A reconcile is an ordered list of [`Step`]s run against a per-invocation
//! context. Each step either lets the pass continue or ends it. Whatever the
//! outcome, the status of the requested object is written once at the end of
//! the pass.

use crate::controller::{ControllerContext, ReconcileAction};
use crate::crd::{CartridgeConfig, CartridgeConfigPhase, Cluster, ClusterPhase, Role, RolePhase};
use crate::error::{OperatorError, OperatorResult};
use crate::resources::ResourceStore;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Requeue delay after an error and the default delay of wait steps.
pub const ERROR_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a single step.
#[derive(Debug)]
pub enum StepOutcome {
    /// Run the next step.
    Next,
    /// Stop here; the object converged as far as it can for now.
    Complete,
    /// Stop here and come back after the delay.
    Requeue(Duration),
    /// Stop here with an error. The pass is requeued after
    /// [`ERROR_TIMEOUT`]; a step wanting another delay logs the error and
    /// returns [`StepOutcome::Requeue`] instead.
    Error(OperatorError),
}

impl StepOutcome {
    /// Requeue after [`ERROR_TIMEOUT`].
    pub fn requeue() -> Self {
        Self::Requeue(ERROR_TIMEOUT)
    }
}

impl From<OperatorError> for StepOutcome {
    fn from(err: OperatorError) -> Self {
        Self::Error(err)
    }
}

/// Evaluates an [`OperatorResult`], ending the step with
/// [`StepOutcome::Error`] on failure.
#[macro_export]
macro_rules! step_try {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => return $crate::reconciliation::StepOutcome::Error(err.into()),
        }
    };
}

/// One idempotent unit of a reconcile.
#[async_trait]
pub trait Step<C: Send>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the step.
    async fn reconcile(&self, ctx: &mut C) -> StepOutcome;
}

/// A custom resource driven by a pipeline.
#[async_trait]
pub trait Reconcilable: Resource<DynamicType = ()> + Clone + Send + Sync + Sized {
    /// Status phase type.
    type Phase: Copy + Debug + Send + Sync;

    /// Kubernetes kind, for logs.
    const KIND_NAME: &'static str;

    /// Current phase.
    fn phase(&self) -> Self::Phase;

    /// Sets the phase.
    fn set_phase(&mut self, phase: Self::Phase);

    /// Clears the per-pass parts of the status.
    fn reset_status(&mut self);

    /// Loads the object.
    async fn fetch(
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<Self>>;

    /// Writes the status, returning the stored object.
    async fn replace_status(&self, store: &dyn ResourceStore) -> OperatorResult<Self>;

    /// Whether the object is being deleted.
    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// Whether anything still holds the object.
    fn has_finalizers(&self) -> bool {
        self.meta()
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| !finalizers.is_empty())
    }
}

/// Namespace and name of the object a pass reconciles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
}

impl ObjectKey {
    /// Key of an existing object.
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.meta().namespace.clone().unwrap_or_default(),
            name: obj.meta().name.clone().unwrap_or_default(),
        }
    }
}

/// State shared by the steps of a pass.
pub trait ReconcileContext: Send {
    /// Type of the requested object.
    type Object: Reconcilable;

    /// Key of the requested object.
    fn key(&self) -> &ObjectKey;

    /// Shared controller dependencies.
    fn services(&self) -> &Arc<ControllerContext>;

    /// The requested object, once loaded.
    fn object(&self) -> Option<&Self::Object>;

    /// The requested object, mutably.
    fn object_mut(&mut self) -> Option<&mut Self::Object>;

    /// Stores the loaded object.
    fn set_object(&mut self, obj: Self::Object);
}

/// A context that resolves the Cluster its object belongs to.
pub trait ClusterBound: ReconcileContext {
    /// The resolved Cluster.
    fn cluster(&self) -> Option<&Cluster>;

    /// The resolved Cluster, mutably.
    fn cluster_mut(&mut self) -> Option<&mut Cluster>;

    /// Stores the resolved Cluster.
    fn set_cluster(&mut self, cluster: Cluster);

    /// The topology leader, once resolved.
    fn leader(&self) -> Option<&Pod>;

    /// Stores the topology leader.
    fn set_leader(&mut self, leader: Pod);
}

/// Result of a pass.
#[derive(Debug)]
pub struct PassResult {
    /// What the controller should do next.
    pub action: ReconcileAction,
    /// Error that ended the pass, if any.
    pub error: Option<OperatorError>,
    /// Step the pass ended at.
    pub last_step: &'static str,
}

impl PassResult {
    /// Converts into the controller's result.
    pub fn into_result(self) -> OperatorResult<ReconcileAction> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.action),
        }
    }
}

/// Runs `steps` in order and persists the status of the requested object.
pub async fn run<C: ReconcileContext>(ctx: &mut C, steps: &[Box<dyn Step<C>>]) -> PassResult {
    let mut last_step = "";
    let mut outcome = None;

    for step in steps {
        last_step = step.name();
        tracing::debug!(
            step = last_step,
            kind = C::Object::KIND_NAME,
            name = %ctx.key().name,
            "Running step"
        );

        match step.reconcile(ctx).await {
            StepOutcome::Next => continue,
            other => {
                outcome = Some(other);
                break;
            }
        }
    }

    let (action, error) = match (persist_status(ctx).await, outcome) {
        (Err(err), _) => (ReconcileAction::Requeue(ERROR_TIMEOUT), Some(err)),
        (Ok(()), Some(StepOutcome::Error(err))) => {
            (ReconcileAction::Requeue(ERROR_TIMEOUT), Some(err))
        }
        (Ok(()), Some(StepOutcome::Requeue(after))) => (ReconcileAction::Requeue(after), None),
        (Ok(()), Some(StepOutcome::Complete | StepOutcome::Next) | None) => {
            (ReconcileAction::Done, None)
        }
    };

    let key = ctx.key();
    match (&error, &action) {
        (Some(err), _) => tracing::error!(
            step = last_step,
            kind = C::Object::KIND_NAME,
            name = %key.name,
            namespace = %key.namespace,
            error = %err,
            "Reconcile failed"
        ),
        (None, ReconcileAction::Requeue(after)) => tracing::info!(
            step = last_step,
            kind = C::Object::KIND_NAME,
            name = %key.name,
            namespace = %key.namespace,
            after = ?after,
            "Requeue at {}",
            last_step
        ),
        (None, ReconcileAction::Done) => tracing::info!(
            step = last_step,
            kind = C::Object::KIND_NAME,
            name = %key.name,
            namespace = %key.namespace,
            "Finish cycle at {}",
            last_step
        ),
    }

    PassResult {
        action,
        error,
        last_step,
    }
}

async fn persist_status<C: ReconcileContext>(ctx: &mut C) -> OperatorResult<()> {
    let Some(obj) = ctx.object() else {
        return Ok(());
    };
    if obj.is_deleting() && !obj.has_finalizers() {
        return Ok(());
    }

    let services = ctx.services().clone();
    let updated = obj.replace_status(services.store.as_ref()).await?;
    ctx.set_object(updated);
    Ok(())
}

#[async_trait]
impl Reconcilable for Cluster {
    type Phase = ClusterPhase;
    const KIND_NAME: &'static str = "Cluster";

    fn phase(&self) -> ClusterPhase {
        Cluster::phase(self)
    }

    fn set_phase(&mut self, phase: ClusterPhase) {
        Cluster::set_phase(self, phase);
    }

    fn reset_status(&mut self) {
        Cluster::reset_status(self);
    }

    async fn fetch(
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<Self>> {
        store.get_cluster(namespace, name).await
    }

    async fn replace_status(&self, store: &dyn ResourceStore) -> OperatorResult<Self> {
        store.replace_cluster_status(self).await
    }
}

#[async_trait]
impl Reconcilable for Role {
    type Phase = RolePhase;
    const KIND_NAME: &'static str = "Role";

    fn phase(&self) -> RolePhase {
        Role::phase(self)
    }

    fn set_phase(&mut self, phase: RolePhase) {
        Role::set_phase(self, phase);
    }

    fn reset_status(&mut self) {
        self.status = Some(Default::default());
    }

    async fn fetch(
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<Self>> {
        store.get_role(namespace, name).await
    }

    async fn replace_status(&self, store: &dyn ResourceStore) -> OperatorResult<Self> {
        store.replace_role_status(self).await
    }
}

#[async_trait]
impl Reconcilable for CartridgeConfig {
    type Phase = CartridgeConfigPhase;
    const KIND_NAME: &'static str = "CartridgeConfig";

    fn phase(&self) -> CartridgeConfigPhase {
        CartridgeConfig::phase(self)
    }

    fn set_phase(&mut self, phase: CartridgeConfigPhase) {
        CartridgeConfig::set_phase(self, phase);
    }

    fn reset_status(&mut self) {
        self.status = Some(Default::default());
    }

    async fn fetch(
        store: &dyn ResourceStore,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<Self>> {
        store.get_cartridge_config(namespace, name).await
    }

    async fn replace_status(&self, store: &dyn ResourceStore) -> OperatorResult<Self> {
        store.replace_cartridge_config_status(self).await
    }
}

