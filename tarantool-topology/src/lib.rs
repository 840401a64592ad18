//! Client-side driver for the Tarantool Cartridge admin API.
//!
//! Instances are reached through a [`Transport`]. The default one,
//! [`PodExec`], runs Lua in the instance console over the Kubernetes exec
//! subresource. On top of it [`CartridgeTopology`] implements the
//! [`Topology`] operations used to assemble a cluster: joining instances,
//! assigning roles and weights, bootstrapping vshard, failover and
//! clusterwide config.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tarantool_topology::{CartridgeTopology, PodExec, Topology};
//! use k8s_openapi::api::core::v1::Pod;
//! use kube::Api;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let topology = CartridgeTopology::new(Arc::new(
//!     PodExec::new(client.clone()).with_container("pod"),
//! ));
//!
//! let pods: Api<Pod> = Api::namespaced(client, "tarantool");
//! let leader = pods.get("storage-0-0").await?;
//!
//! if topology.is_cartridge_configured(&leader).await? {
//!     let hierarchy = topology.roles_hierarchy(&leader).await?;
//!     println!("known roles: {:?}", hierarchy.keys().collect::<Vec<_>>());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! [`TopologyError::is_transport`] separates calls that never reached the
//! instance from calls that ran and failed:
//!
//! ```no_run
//! # use tarantool_topology::{Topology, TopologyError};
//! # use k8s_openapi::api::core::v1::Pod;
//! # async fn example(topology: &dyn Topology, leader: &Pod) {
//! match topology.set_weight(leader, "uuid", 0).await {
//!     Ok(()) => {}
//!     Err(TopologyError::LastStorageWeight) => println!("keeping weight"),
//!     Err(e) if e.is_transport() => println!("instance unreachable: {e}"),
//!     Err(e) => println!("error: {e}"),
//! }
//! # }
//! ```

pub mod codec;
mod driver;
mod error;
pub mod roles;
mod transport;
pub mod types;

pub use driver::{CartridgeTopology, RESERVED_CONFIG_SECTIONS, Topology, without_reserved_sections};
pub use error::{Result, TopologyError};
pub use transport::{DEFAULT_EXEC_TIMEOUT, PodExec, Transport};
pub use types::{
    CartridgeConfigData, FailoverMode, FailoverParams, FailoverStateProvider, JoinOutcome,
    JoinRequest, LuaError, RolesHierarchy,
};
