//! CartridgeConfig Custom Resource Definition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CartridgeConfig is the Schema for the cartridgeconfigs API.
///
/// Holds a clusterwide config document which is patched into the labelled
/// cluster once it is bootstrapped.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tarantool.io",
    version = "v1beta1",
    kind = "CartridgeConfig",
    plural = "cartridgeconfigs",
    namespaced,
    status = "CartridgeConfigStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CartridgeConfigSpec {
    /// YAML document, one top-level key per config section.
    #[serde(default)]
    pub data: String,
}

/// Status of a CartridgeConfig.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CartridgeConfigStatus {
    /// Current phase.
    #[serde(default)]
    pub phase: CartridgeConfigPhase,
}

/// CartridgeConfig phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum CartridgeConfigPhase {
    /// The labelled cluster is missing or not bootstrapped.
    #[default]
    WaitingForCluster,
    /// Waiting for a topology leader.
    WaitingForLeader,
    /// Uploading the config.
    Applying,
    /// The cluster runs with this config.
    Ready,
}

impl CartridgeConfig {
    /// Current phase.
    pub fn phase(&self) -> CartridgeConfigPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Sets the phase.
    pub fn set_phase(&mut self, phase: CartridgeConfigPhase) {
        self.status.get_or_insert_with(Default::default).phase = phase;
    }
}
