//! Custom Resource Definitions for the Tarantool operator.
//!
//! - [`Cluster`]: a Cartridge cluster
//! - [`Role`]: a group of identical replicasets of a cluster
//! - [`CartridgeConfig`]: clusterwide config of a cluster

mod cartridge_config;
mod cluster;
mod role;

pub use cartridge_config::{
    CartridgeConfig, CartridgeConfigPhase, CartridgeConfigSpec, CartridgeConfigStatus,
};
pub use cluster::{
    Cluster, ClusterPhase, ClusterSpec, ClusterStatus, Etcd2Spec, FailoverMode, FailoverSpec,
    SecretReference, StateProvider, StateboardSpec,
};
pub use role::{ReplicasetTemplate, Role, RolePhase, RoleSpec, RoleStatus, VShardSpec};
