//! Access to the Kubernetes objects the operator reads and writes.
//!
//! Controllers and steps only see [`ResourceStore`], which keeps the
//! reconciliation logic independent of a live API server.

use crate::crd::{CartridgeConfig, Cluster, Role};
use crate::error::{OperatorError, OperatorResult};
use crate::labels::{self, Labels};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use kube::api::{ListParams, PostParams};
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Reads and writes of the objects a reconcile touches.
///
/// Status and object replaces are optimistic: they carry the object's
/// `resourceVersion` and fail with [`OperatorError::Conflict`] when it is
/// stale.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Gets a Cluster.
    async fn get_cluster(&self, namespace: &str, name: &str) -> OperatorResult<Option<Cluster>>;
    /// Gets a Role.
    async fn get_role(&self, namespace: &str, name: &str) -> OperatorResult<Option<Role>>;
    /// Gets a CartridgeConfig.
    async fn get_cartridge_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<CartridgeConfig>>;
    /// Lists Roles matching `selector`, sorted by name.
    async fn list_roles(&self, namespace: &str, selector: &Labels) -> OperatorResult<Vec<Role>>;

    /// Replaces the status of a Cluster.
    async fn replace_cluster_status(&self, cluster: &Cluster) -> OperatorResult<Cluster>;
    /// Replaces the status of a Role.
    async fn replace_role_status(&self, role: &Role) -> OperatorResult<Role>;
    /// Replaces the status of a CartridgeConfig.
    async fn replace_cartridge_config_status(
        &self,
        config: &CartridgeConfig,
    ) -> OperatorResult<CartridgeConfig>;

    /// Gets a Pod.
    async fn get_pod(&self, namespace: &str, name: &str) -> OperatorResult<Option<Pod>>;
    /// Lists Pods matching `selector`.
    async fn list_pods(&self, namespace: &str, selector: &Labels) -> OperatorResult<Vec<Pod>>;

    /// Lists StatefulSets matching `selector`.
    async fn list_stateful_sets(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> OperatorResult<Vec<StatefulSet>>;
    /// Creates a StatefulSet.
    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> OperatorResult<StatefulSet>;
    /// Replaces a StatefulSet.
    async fn replace_stateful_set(&self, stateful_set: &StatefulSet)
    -> OperatorResult<StatefulSet>;

    /// Gets a Service.
    async fn get_service(&self, namespace: &str, name: &str) -> OperatorResult<Option<Service>>;
    /// Creates a Service.
    async fn create_service(&self, service: &Service) -> OperatorResult<Service>;
    /// Replaces a Service.
    async fn replace_service(&self, service: &Service) -> OperatorResult<Service>;

    /// Gets a Secret.
    async fn get_secret(&self, namespace: &str, name: &str) -> OperatorResult<Option<Secret>>;
}

/// [`ResourceStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    /// Creates a store using `client`.
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> OperatorResult<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K>(&self, namespace: &str, selector: &Labels) -> OperatorResult<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let params = ListParams::default().labels(&labels::to_selector(selector));
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn create<K>(&self, obj: &K) -> OperatorResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let namespace = obj.namespace().unwrap_or_default();
        tracing::info!(
            kind = %K::kind(&K::DynamicType::default()),
            name = %obj.name_any(),
            namespace = %namespace,
            "Creating resource"
        );
        Ok(self
            .api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn replace<K>(&self, obj: &K) -> OperatorResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| conflict::<K>(e, &name))
    }

    async fn replace_status<K>(&self, obj: &K) -> OperatorResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let data = serde_json::to_vec(obj)?;
        self.api::<K>(&namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| conflict::<K>(e, &name))
    }
}

fn conflict<K>(err: kube::Error, name: &str) -> OperatorError
where
    K: Resource,
    K::DynamicType: Default,
{
    match err {
        kube::Error::Api(response) if response.code == 409 => OperatorError::Conflict {
            kind: K::kind(&K::DynamicType::default()).to_string(),
            name: name.to_string(),
        },
        other => other.into(),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> OperatorResult<Option<Cluster>> {
        self.get(namespace, name).await
    }

    async fn get_role(&self, namespace: &str, name: &str) -> OperatorResult<Option<Role>> {
        self.get(namespace, name).await
    }

    async fn get_cartridge_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<CartridgeConfig>> {
        self.get(namespace, name).await
    }

    async fn list_roles(&self, namespace: &str, selector: &Labels) -> OperatorResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.list(namespace, selector).await?;
        roles.sort_by_key(|role| role.name_any());
        Ok(roles)
    }

    async fn replace_cluster_status(&self, cluster: &Cluster) -> OperatorResult<Cluster> {
        self.replace_status(cluster).await
    }

    async fn replace_role_status(&self, role: &Role) -> OperatorResult<Role> {
        self.replace_status(role).await
    }

    async fn replace_cartridge_config_status(
        &self,
        config: &CartridgeConfig,
    ) -> OperatorResult<CartridgeConfig> {
        self.replace_status(config).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> OperatorResult<Option<Pod>> {
        self.get(namespace, name).await
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> OperatorResult<Vec<Pod>> {
        self.list(namespace, selector).await
    }

    async fn list_stateful_sets(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> OperatorResult<Vec<StatefulSet>> {
        self.list(namespace, selector).await
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> OperatorResult<StatefulSet> {
        self.create(stateful_set).await
    }

    async fn replace_stateful_set(
        &self,
        stateful_set: &StatefulSet,
    ) -> OperatorResult<StatefulSet> {
        self.replace(stateful_set).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> OperatorResult<Option<Service>> {
        self.get(namespace, name).await
    }

    async fn create_service(&self, service: &Service) -> OperatorResult<Service> {
        self.create(service).await
    }

    async fn replace_service(&self, service: &Service) -> OperatorResult<Service> {
        self.replace(service).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> OperatorResult<Option<Secret>> {
        self.get(namespace, name).await
    }
}
