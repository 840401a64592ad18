//! Replicaset identity and StatefulSet materialisation.
//!
//! Replicaset `n` of role `r` is named `r-n` and its UUID is derived from
//! that name, so the identity survives StatefulSet re-creation.

use crate::crd::{Cluster, Role};
use crate::error::{OperatorError, OperatorResult};
use crate::labels::{self, Labels};
use crate::resources::ResourceStore;
use k8s_openapi::api::apps::v1::{
    StatefulSet, StatefulSetPersistentVolumeClaimRetentionPolicy, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Namespace of replicaset UUIDs.
pub const REPLICASET_UUID_NAMESPACE: Uuid =
    Uuid::from_u128(0x8601615b_c39f_4fd9_a88b_9df688656cbd);

const POD_TEMPLATE_HASH_LEN: usize = 16;

/// Alias of replicaset `ordinal` of `role`.
pub fn replicaset_name(role: &str, ordinal: i32) -> String {
    format!("{role}-{ordinal}")
}

/// UUID of replicaset `ordinal` of `role`.
pub fn replicaset_uuid(role: &str, ordinal: i32) -> Uuid {
    Uuid::new_v5(
        &REPLICASET_UUID_NAMESPACE,
        replicaset_name(role, ordinal).as_bytes(),
    )
}

/// URI other instances use to reach `pod`.
pub fn advertise_uri(cluster: &Cluster, pod: &str) -> String {
    format!(
        "{pod}.{cluster}.{namespace}.svc.{domain}:{port}",
        cluster = cluster.name_any(),
        namespace = cluster.namespace().unwrap_or_default(),
        domain = cluster.spec.domain,
        port = cluster.spec.listen_port,
    )
}

/// Hash of a pod template, usable as a label value.
pub fn pod_template_hash(template: &PodTemplateSpec) -> OperatorResult<String> {
    let json = serde_json::to_vec(template)?;
    let mut hash = hex::encode(Sha256::digest(&json));
    hash.truncate(POD_TEMPLATE_HASH_LEN);
    Ok(hash)
}

fn required_labels(cluster: &Cluster, role: &Role, ordinal: i32, hash: &str) -> Labels {
    let role_name = role.name_any();
    let mut labels = labels::role_selector(&cluster.name_any(), &role_name);
    labels.insert(
        labels::REPLICASET_NAME.to_string(),
        replicaset_name(&role_name, ordinal),
    );
    labels.insert(
        labels::REPLICASET_UUID.to_string(),
        replicaset_uuid(&role_name, ordinal).to_string(),
    );
    labels.insert(labels::REPLICASET_ORDINAL.to_string(), ordinal.to_string());
    labels.insert(labels::POD_TEMPLATE_HASH.to_string(), hash.to_string());
    labels
}

/// Builds the StatefulSet of replicaset `ordinal` of `role`.
pub fn build_stateful_set(
    cluster: &Cluster,
    role: &Role,
    ordinal: i32,
) -> OperatorResult<StatefulSet> {
    let role_name = role.name_any();
    let name = replicaset_name(&role_name, ordinal);

    let mut selector = labels::role_selector(&cluster.name_any(), &role_name);
    selector.insert(labels::REPLICASET_NAME.to_string(), name.clone());
    selector.insert(
        labels::REPLICASET_UUID.to_string(),
        replicaset_uuid(&role_name, ordinal).to_string(),
    );

    let mut stateful_set = StatefulSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: role.namespace(),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(role.spec.replicaset_template.replicas),
            service_name: cluster.name_any(),
            pod_management_policy: Some("Parallel".to_string()),
            revision_history_limit: Some(1),
            persistent_volume_claim_retention_policy: Some(
                StatefulSetPersistentVolumeClaimRetentionPolicy {
                    when_deleted: Some("Retain".to_string()),
                    when_scaled: Some("Retain".to_string()),
                },
            ),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            volume_claim_templates: Some(
                role.spec.replicaset_template.volume_claim_templates.clone(),
            )
            .filter(|templates| !templates.is_empty()),
            ..Default::default()
        }),
        ..Default::default()
    };

    sync_stateful_set(cluster, role, &mut stateful_set, ordinal)?;
    Ok(stateful_set)
}

/// Brings a StatefulSet in line with its role. Returns whether anything
/// changed.
pub fn sync_stateful_set(
    cluster: &Cluster,
    role: &Role,
    stateful_set: &mut StatefulSet,
    ordinal: i32,
) -> OperatorResult<bool> {
    let template = &role.spec.replicaset_template;
    let hash = pod_template_hash(&template.pod_template)?;
    let mut changed = false;

    if let Some(owner) = role.controller_owner_ref(&()) {
        let owners = stateful_set.metadata.owner_references.get_or_insert_with(Vec::new);
        if !owners.iter().any(|o| o.uid == owner.uid) {
            owners.push(owner);
            changed = true;
        }
    }

    let spec = stateful_set.spec.get_or_insert_with(Default::default);

    if spec.replicas.unwrap_or(0) < template.replicas {
        spec.replicas = Some(template.replicas);
        changed = true;
    }

    if spec.min_ready_seconds.unwrap_or(0) != template.min_ready_seconds.unwrap_or(0) {
        spec.min_ready_seconds = template.min_ready_seconds;
        changed = true;
    }

    if let Some(strategy) = &template.update_strategy {
        let mut strategy = strategy.clone();
        if strategy.type_.as_deref() == Some("OnDelete") {
            strategy.rolling_update = None;
        }
        if spec.update_strategy.as_ref() != Some(&strategy) {
            spec.update_strategy = Some(strategy);
            changed = true;
        }
    }

    let current_hash = stateful_set
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::POD_TEMPLATE_HASH));
    if current_hash != Some(&hash) {
        spec.template = template.pod_template.clone();
        changed = true;
    }

    let desired_labels = labels::merge([
        &labels::cluster_selector(&cluster.name_any()),
        role.labels(),
        &required_labels(cluster, role, ordinal, &hash),
    ]);
    if stateful_set.metadata.labels.as_ref() != Some(&desired_labels) {
        stateful_set.metadata.labels = Some(desired_labels.clone());
        changed = true;
    }

    let pod_metadata = spec.template.metadata.get_or_insert_with(Default::default);
    let pod_labels = labels::merge([
        pod_metadata.labels.as_ref().unwrap_or(&Labels::new()),
        &desired_labels,
    ]);
    if pod_metadata.labels.as_ref() != Some(&pod_labels) {
        pod_metadata.labels = Some(pod_labels);
        changed = true;
    }

    let annotations = role.annotations();
    if stateful_set.metadata.annotations.as_ref().unwrap_or(&Labels::new()) != annotations {
        stateful_set.metadata.annotations = Some(annotations.clone());
        changed = true;
    }

    Ok(changed)
}

/// Keeps the StatefulSets of a role in place.
pub struct ReplicasetManager<'a> {
    store: &'a dyn ResourceStore,
}

impl<'a> ReplicasetManager<'a> {
    /// Creates a manager writing through `store`.
    pub fn new(store: &'a dyn ResourceStore) -> Self {
        Self { store }
    }

    /// Creates the StatefulSets of replicasets that have none.
    pub async fn create_stateful_sets(&self, cluster: &Cluster, role: &Role) -> OperatorResult<()> {
        let namespace = namespace_of(role)?;
        let cluster_name = cluster.name_any();
        let role_name = role.name_any();

        for ordinal in 0..role.spec.replicasets {
            let selector = labels::ordinal_selector(&cluster_name, &role_name, ordinal);
            let existing = self.store.list_stateful_sets(&namespace, &selector).await?;
            if !existing.is_empty() {
                continue;
            }

            let stateful_set = build_stateful_set(cluster, role, ordinal)?;
            tracing::info!(
                name = %stateful_set.name_any(),
                namespace = %namespace,
                role = %role_name,
                ordinal,
                "Creating replicaset StatefulSet"
            );
            self.store.create_stateful_set(&stateful_set).await?;
        }

        Ok(())
    }

    /// Syncs every StatefulSet of a role, replacing the ones that drifted.
    pub async fn update_stateful_sets(&self, cluster: &Cluster, role: &Role) -> OperatorResult<()> {
        let namespace = namespace_of(role)?;
        let selector = labels::role_selector(&cluster.name_any(), &role.name_any());

        for mut stateful_set in self.store.list_stateful_sets(&namespace, &selector).await? {
            let Some(ordinal) = ordinal_of(&stateful_set) else {
                tracing::warn!(
                    name = %stateful_set.name_any(),
                    "StatefulSet has no replicaset ordinal label, skipping"
                );
                continue;
            };

            if sync_stateful_set(cluster, role, &mut stateful_set, ordinal)? {
                tracing::info!(
                    name = %stateful_set.name_any(),
                    namespace = %namespace,
                    "Updating replicaset StatefulSet"
                );
                self.store.replace_stateful_set(&stateful_set).await?;
            }
        }

        Ok(())
    }
}

/// Replicaset ordinal recorded on a StatefulSet.
pub fn ordinal_of(stateful_set: &StatefulSet) -> Option<i32> {
    stateful_set
        .labels()
        .get(labels::REPLICASET_ORDINAL)
        .and_then(|ordinal| ordinal.parse().ok())
}

fn namespace_of<K: Resource>(obj: &K) -> OperatorResult<String> {
    obj.meta()
        .namespace
        .clone()
        .ok_or_else(|| OperatorError::InvalidConfig("Resource must be namespaced".into()))
}
