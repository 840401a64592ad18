//! Tarantool Cartridge Kubernetes Operator
//!
//! This crate provides a Kubernetes operator that deploys Tarantool Cartridge
//! clusters and drives their topology: instances are joined into
//! replicasets, vshard is bootstrapped once, and failover settings and the
//! clusterwide config follow their custom resources.
//!
//! # Custom Resource Definitions
//!
//! - **Cluster**: cluster-wide settings, leader and bootstrap state
//! - **Role**: a group of identical replicasets, one StatefulSet each
//! - **CartridgeConfig**: clusterwide config sections to apply
//!
//! # Example
//!
//! ```yaml
//! apiVersion: tarantool.io/v1alpha2
//! kind: Cluster
//! metadata:
//!   name: tarantool
//! spec:
//!   listenPort: 3301
//!   failover:
//!     mode: eventual
//! ---
//! apiVersion: tarantool.io/v1beta1
//! kind: Role
//! metadata:
//!   name: storage
//!   labels:
//!     tarantool.io/cluster-name: tarantool
//! spec:
//!   replicasets: 2
//!   replicasetTemplate:
//!     replicas: 2
//!   vshard:
//!     clusterRoles: [vshard-storage]
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod election;
pub mod error;
pub mod events;
pub mod labels;
pub mod pods;
pub mod reconciliation;
pub mod replicasets;
pub mod resources;
pub mod steps;

pub use crd::{CartridgeConfig, Cluster, ClusterSpec, Role, RoleSpec};
pub use error::{OperatorError, OperatorResult};
