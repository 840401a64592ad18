//! Common test utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    ContainerStatus, ObjectReference, Pod, PodStatus, Secret, Service,
};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tarantool_operator::controller::ControllerContext;
use tarantool_operator::crd::{
    CartridgeConfig, CartridgeConfigSpec, Cluster, ClusterSpec, ClusterStatus, Role, RolePhase, RoleSpec,
    RoleStatus,
};
use tarantool_operator::error::{OperatorError, OperatorResult};
use tarantool_operator::events::{EventRecord, EventRecorder};
use tarantool_operator::labels::{self, Labels};
use tarantool_operator::resources::ResourceStore;
use tarantool_topology::{
    CartridgeConfigData, FailoverParams, JoinOutcome, JoinRequest, LuaError, Result,
    RolesHierarchy, Topology, TopologyError,
};

pub const NAMESPACE: &str = "db";
pub const CLUSTER: &str = "tarantool";

type Key = (String, String);
type Objects<K> = Mutex<BTreeMap<Key, K>>;

fn key_of<K: Resource>(obj: &K) -> Key {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

/// In-memory [`ResourceStore`] with resourceVersion checks on replace.
#[derive(Default)]
pub struct MemoryStore {
    clusters: Objects<Cluster>,
    roles: Objects<Role>,
    configs: Objects<CartridgeConfig>,
    pods: Objects<Pod>,
    stateful_sets: Objects<StatefulSet>,
    services: Objects<Service>,
    secrets: Objects<Secret>,
    version: AtomicU64,
    status_writes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn stamp<K: Resource>(&self, obj: &mut K) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let meta = obj.meta_mut();
        meta.resource_version = Some(version.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(format!(
                "uid-{}",
                meta.name.clone().unwrap_or_default()
            ));
        }
    }

    fn put<K: Resource + Clone>(&self, objects: &Objects<K>, mut obj: K) -> K {
        self.stamp(&mut obj);
        objects
            .lock()
            .unwrap()
            .insert(key_of(&obj), obj.clone());
        obj
    }

    fn fetch<K: Resource + Clone>(objects: &Objects<K>, namespace: &str, name: &str) -> Option<K> {
        objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn select<K: Resource + Clone>(objects: &Objects<K>, namespace: &str, selector: &Labels) -> Vec<K> {
        objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), obj)| ns == namespace && labels::matches(obj.meta().labels.as_ref(), selector))
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    fn create<K: Resource + Clone>(&self, objects: &Objects<K>, kind: &str, obj: &K) -> OperatorResult<K> {
        let key = key_of(obj);
        if objects.lock().unwrap().contains_key(&key) {
            return Err(OperatorError::Conflict {
                kind: kind.to_string(),
                name: key.1,
            });
        }
        Ok(self.put(objects, obj.clone()))
    }

    fn update<K: Resource + Clone>(
        &self,
        objects: &Objects<K>,
        kind: &str,
        obj: &K,
        apply: impl FnOnce(&mut K, &K),
    ) -> OperatorResult<K> {
        let (namespace, name) = key_of(obj);
        let mut stored = Self::fetch(objects, &namespace, &name)
            .ok_or_else(|| OperatorError::not_found(kind, &namespace, &name))?;

        if let Some(version) = &obj.meta().resource_version {
            if stored.meta().resource_version.as_ref() != Some(version) {
                return Err(OperatorError::Conflict {
                    kind: kind.to_string(),
                    name,
                });
            }
        }

        apply(&mut stored, obj);
        Ok(self.put(objects, stored))
    }

    fn record_status_write(&self, kind: &str, name: &str) {
        self.status_writes
            .lock()
            .unwrap()
            .push(format!("{kind}/{name}"));
    }

    pub fn insert_cluster(&self, cluster: Cluster) -> Cluster {
        self.put(&self.clusters, cluster)
    }

    pub fn insert_role(&self, role: Role) -> Role {
        self.put(&self.roles, role)
    }

    pub fn insert_config(&self, config: CartridgeConfig) -> CartridgeConfig {
        self.put(&self.configs, config)
    }

    pub fn insert_pod(&self, pod: Pod) -> Pod {
        self.put(&self.pods, pod)
    }

    pub fn insert_secret(&self, secret: Secret) -> Secret {
        self.put(&self.secrets, secret)
    }

    pub fn remove_pod(&self, name: &str) {
        self.pods
            .lock()
            .unwrap()
            .remove(&(NAMESPACE.to_string(), name.to_string()));
    }

    /// Bumps the resourceVersion of a cluster as a concurrent writer would.
    pub fn touch_cluster(&self, name: &str) {
        if let Some(cluster) = Self::fetch(&self.clusters, NAMESPACE, name) {
            self.put(&self.clusters, cluster);
        }
    }

    pub fn cluster(&self, name: &str) -> Cluster {
        Self::fetch(&self.clusters, NAMESPACE, name).expect("cluster exists")
    }

    pub fn role(&self, name: &str) -> Role {
        Self::fetch(&self.roles, NAMESPACE, name).expect("role exists")
    }

    pub fn config(&self, name: &str) -> CartridgeConfig {
        Self::fetch(&self.configs, NAMESPACE, name).expect("config exists")
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        Self::fetch(&self.services, NAMESPACE, name)
    }

    pub fn all_stateful_sets(&self) -> Vec<StatefulSet> {
        self.stateful_sets.lock().unwrap().values().cloned().collect()
    }

    pub fn status_writes(&self) -> Vec<String> {
        self.status_writes.lock().unwrap().clone()
    }

    /// Creates the pods of every StatefulSet, running and ready, the way the
    /// StatefulSet controller would.
    pub fn spawn_pods(&self) -> Vec<Pod> {
        let mut spawned = Vec::new();
        for sts in self.all_stateful_sets() {
            let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
            let template_labels = sts
                .spec
                .as_ref()
                .and_then(|s| s.template.metadata.as_ref())
                .and_then(|m| m.labels.clone())
                .unwrap_or_default();

            for ordinal in 0..replicas {
                let name = labels::pod_name(&sts.name_any(), ordinal);
                if Self::fetch(&self.pods, NAMESPACE, &name).is_some() {
                    continue;
                }
                spawned.push(self.insert_pod(running_pod(&name, template_labels.clone())));
            }
        }
        spawned
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> OperatorResult<Option<Cluster>> {
        Ok(Self::fetch(&self.clusters, namespace, name))
    }

    async fn get_role(&self, namespace: &str, name: &str) -> OperatorResult<Option<Role>> {
        Ok(Self::fetch(&self.roles, namespace, name))
    }

    async fn get_cartridge_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<CartridgeConfig>> {
        Ok(Self::fetch(&self.configs, namespace, name))
    }

    async fn list_roles(&self, namespace: &str, selector: &Labels) -> OperatorResult<Vec<Role>> {
        Ok(Self::select(&self.roles, namespace, selector))
    }

    async fn replace_cluster_status(&self, cluster: &Cluster) -> OperatorResult<Cluster> {
        let updated = self.update(&self.clusters, "Cluster", cluster, |stored, obj| {
            stored.status = obj.status.clone();
        })?;
        self.record_status_write("Cluster", &cluster.name_any());
        Ok(updated)
    }

    async fn replace_role_status(&self, role: &Role) -> OperatorResult<Role> {
        let updated = self.update(&self.roles, "Role", role, |stored, obj| {
            stored.status = obj.status.clone();
        })?;
        self.record_status_write("Role", &role.name_any());
        Ok(updated)
    }

    async fn replace_cartridge_config_status(
        &self,
        config: &CartridgeConfig,
    ) -> OperatorResult<CartridgeConfig> {
        let updated = self.update(&self.configs, "CartridgeConfig", config, |stored, obj| {
            stored.status = obj.status.clone();
        })?;
        self.record_status_write("CartridgeConfig", &config.name_any());
        Ok(updated)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> OperatorResult<Option<Pod>> {
        Ok(Self::fetch(&self.pods, namespace, name))
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> OperatorResult<Vec<Pod>> {
        Ok(Self::select(&self.pods, namespace, selector))
    }

    async fn list_stateful_sets(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> OperatorResult<Vec<StatefulSet>> {
        Ok(Self::select(&self.stateful_sets, namespace, selector))
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> OperatorResult<StatefulSet> {
        self.create(&self.stateful_sets, "StatefulSet", stateful_set)
    }

    async fn replace_stateful_set(
        &self,
        stateful_set: &StatefulSet,
    ) -> OperatorResult<StatefulSet> {
        self.update(&self.stateful_sets, "StatefulSet", stateful_set, |stored, obj| {
            *stored = obj.clone();
        })
    }

    async fn get_service(&self, namespace: &str, name: &str) -> OperatorResult<Option<Service>> {
        Ok(Self::fetch(&self.services, namespace, name))
    }

    async fn create_service(&self, service: &Service) -> OperatorResult<Service> {
        self.create(&self.services, "Service", service)
    }

    async fn replace_service(&self, service: &Service) -> OperatorResult<Service> {
        self.update(&self.services, "Service", service, |stored, obj| {
            *stored = obj.clone();
        })
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> OperatorResult<Option<Secret>> {
        Ok(Self::fetch(&self.secrets, namespace, name))
    }
}

/// State behind [`FakeTopology`].
#[derive(Debug, Default)]
pub struct TopologyState {
    /// Pods where Cartridge has started.
    pub started: BTreeSet<String>,
    /// Pods that applied their roles.
    pub configured: BTreeSet<String>,
    /// Instance UUID per pod, once joined.
    pub instance_uuids: BTreeMap<String, String>,
    pub joins: Vec<(String, JoinRequest, Vec<String>)>,
    pub replicaset_roles: BTreeMap<String, Vec<String>>,
    pub set_roles_calls: usize,
    pub weights: BTreeMap<String, i32>,
    pub bootstrap_calls: usize,
    /// Lua error text bootstrap fails with.
    pub bootstrap_error: Option<String>,
    pub hierarchy: RolesHierarchy,
    /// Roles the application does not know.
    pub unknown_roles: BTreeSet<String>,
    pub failover: FailoverParams,
    pub set_failover_calls: Vec<FailoverParams>,
    pub config: CartridgeConfigData,
    pub apply_calls: usize,
    /// Pods whose console exec times out.
    pub unreachable: BTreeSet<String>,
    /// Replicasets whose weight change Cartridge refuses as the last
    /// weighted storage.
    pub last_storages: BTreeSet<String>,
}

/// [`Topology`] simulating a Cartridge cluster in memory.
#[derive(Default)]
pub struct FakeTopology {
    pub state: Mutex<TopologyState>,
}

impl FakeTopology {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn start(&self, pod: &str) {
        self.state.lock().unwrap().started.insert(pod.to_string());
    }

    pub fn configure(&self, pod: &str) {
        let mut state = self.state.lock().unwrap();
        state.started.insert(pod.to_string());
        state.configured.insert(pod.to_string());
        state
            .instance_uuids
            .insert(pod.to_string(), format!("instance-{pod}"));
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut TopologyState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

fn lua_error(class_name: &str, err: &str) -> LuaError {
    LuaError {
        class_name: class_name.to_string(),
        err: err.to_string(),
        ..Default::default()
    }
}

fn pod_name(pod: &Pod) -> String {
    pod.name_any()
}

#[async_trait]
impl Topology for FakeTopology {
    async fn join(
        &self,
        leader: &Pod,
        replicaset: &JoinRequest,
        advertise_uris: &[String],
    ) -> Result<JoinOutcome> {
        let mut state = self.state.lock().unwrap();
        if let Some(role) = replicaset
            .roles
            .iter()
            .find(|role| state.unknown_roles.contains(*role))
        {
            return Err(TopologyError::UnknownRole(lua_error(
                "EditTopologyError",
                &format!("Replicaset {} can not enable unknown role \"{role}\"", replicaset.uuid),
            )));
        }

        for uri in advertise_uris {
            let pod = uri.split('.').next().unwrap_or_default().to_string();
            state
                .instance_uuids
                .insert(pod.clone(), format!("instance-{pod}"));
            state.configured.insert(pod);
        }
        state
            .replicaset_roles
            .insert(replicaset.uuid.clone(), replicaset.roles.clone());
        state.joins.push((
            pod_name(leader),
            replicaset.clone(),
            advertise_uris.to_vec(),
        ));
        Ok(JoinOutcome::Joined)
    }

    async fn instance_uuid(&self, pod: &Pod) -> Result<String> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .instance_uuids
            .get(&pod_name(pod))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_weight(&self, _leader: &Pod, replicaset_uuid: &str, weight: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.replicaset_roles.contains_key(replicaset_uuid) {
            return Err(TopologyError::NotInConfig);
        }
        if state.last_storages.contains(replicaset_uuid) {
            return Err(TopologyError::LastStorageWeight);
        }
        state.weights.insert(replicaset_uuid.to_string(), weight);
        Ok(())
    }

    async fn replicaset_roles(&self, _leader: &Pod, replicaset_uuid: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .replicaset_roles
            .get(replicaset_uuid)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_replicaset_roles(
        &self,
        _leader: &Pod,
        replicaset_uuid: &str,
        roles: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.set_roles_calls += 1;
        state
            .replicaset_roles
            .insert(replicaset_uuid.to_string(), roles.to_vec());
        Ok(())
    }

    async fn bootstrap_vshard(&self, _leader: &Pod) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.bootstrap_calls += 1;
        match &state.bootstrap_error {
            Some(err) => Err(TopologyError::Lua {
                context: "unable to bootstrap cluster",
                source: lua_error("Bootstrapping vshard failed", err),
            }),
            None => Ok(()),
        }
    }

    async fn roles_hierarchy(&self, _leader: &Pod) -> Result<RolesHierarchy> {
        Ok(self.state.lock().unwrap().hierarchy.clone())
    }

    async fn set_failover_params(&self, _leader: &Pod, params: &FailoverParams) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.failover = params.clone();
        state.set_failover_calls.push(params.clone());
        Ok(())
    }

    async fn failover_params(&self, _leader: &Pod) -> Result<FailoverParams> {
        Ok(self.state.lock().unwrap().failover.clone())
    }

    async fn cartridge_config(&self, _leader: &Pod) -> Result<CartridgeConfigData> {
        Ok(self.state.lock().unwrap().config.clone())
    }

    async fn apply_cartridge_config(
        &self,
        _leader: &Pod,
        config: &CartridgeConfigData,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.apply_calls += 1;
        for (section, value) in config {
            state.config.insert(section.clone(), value.clone());
        }
        Ok(())
    }

    async fn is_cartridge_started(&self, pod: &Pod) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let name = pod_name(pod);
        if state.unreachable.contains(&name) {
            return Err(TopologyError::Timeout(Duration::from_secs(2)));
        }
        Ok(state.started.contains(&name))
    }

    async fn is_cartridge_configured(&self, pod: &Pod) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let name = pod_name(pod);
        if state.unreachable.contains(&name) {
            return Err(TopologyError::Timeout(Duration::from_secs(2)));
        }
        Ok(state.configured.contains(&name))
    }
}

/// [`EventRecorder`] keeping every event.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(String, EventRecord)>>,
}

impl RecordingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.reason.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<(String, EventRecord)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventRecorder for RecordingEvents {
    async fn record(&self, reference: ObjectReference, event: EventRecord) {
        self.events
            .lock()
            .unwrap()
            .push((reference.name.unwrap_or_default(), event));
    }
}

/// Store, topology and events wired into a controller context.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub topology: Arc<FakeTopology>,
    pub events: Arc<RecordingEvents>,
    pub ctx: Arc<ControllerContext>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let topology = FakeTopology::new();
        let events = RecordingEvents::new();
        let ctx = Arc::new(ControllerContext::new(
            store.clone(),
            topology.clone(),
            events.clone(),
        ));
        Self {
            store,
            topology,
            events,
            ctx,
        }
    }
}

pub fn cluster(name: &str) -> Cluster {
    let mut cluster = Cluster::new(
        name,
        ClusterSpec {
            domain: "cluster.local".to_string(),
            listen_port: 3301,
            failover: Default::default(),
            foreign_leader: None,
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster
}

pub fn bootstrapped_cluster(name: &str, leader: &str) -> Cluster {
    let mut cluster = cluster(name);
    cluster.status = Some(ClusterStatus {
        bootstrapped: true,
        leader: Some(leader.to_string()),
        ..Default::default()
    });
    cluster
}

pub fn role(name: &str, replicasets: i32, replicas: i32, cluster_roles: &[&str]) -> Role {
    let mut spec = RoleSpec {
        replicasets,
        ..Default::default()
    };
    spec.replicaset_template.replicas = replicas;
    spec.vshard.cluster_roles = cluster_roles.iter().map(|r| r.to_string()).collect();

    let mut role = Role::new(name, spec);
    role.metadata.namespace = Some(NAMESPACE.to_string());
    role.labels_mut()
        .insert(labels::CLUSTER_NAME.to_string(), CLUSTER.to_string());
    role
}

pub fn role_in_phase(name: &str, cluster_roles: &[&str], phase: RolePhase) -> Role {
    let mut role = role(name, 1, 1, cluster_roles);
    role.status = Some(RoleStatus { phase });
    role
}

pub fn cartridge_config(name: &str, data: &str) -> CartridgeConfig {
    let mut config = CartridgeConfig::new(
        name,
        CartridgeConfigSpec {
            data: data.to_string(),
        },
    );
    config.metadata.namespace = Some(NAMESPACE.to_string());
    config
        .labels_mut()
        .insert(labels::CLUSTER_NAME.to_string(), CLUSTER.to_string());
    config
}

/// Pod in phase Running with its first container ready.
pub fn running_pod(name: &str, labels: Labels) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "pod".to_string(),
                ready: true,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod of replica `replica` of replicaset `replicaset` of `role`.
pub fn role_pod(role: &str, replicaset: i32, replica: i32) -> Pod {
    running_pod(
        &labels::pod_name(&format!("{role}-{replicaset}"), replica),
        labels::role_selector(CLUSTER, role),
    )
}

pub fn secret(name: &str, key: &str, value: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            key.to_string(),
            ByteString(value.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

pub fn json_map(value: Value) -> CartridgeConfigData {
    match value {
        Value::Object(map) => map,
        _ => CartridgeConfigData::new(),
    }
}
