//! Step libraries of the three pipelines.
//!
//! [`common`] holds the steps every pipeline shares. The other modules each
//! define a context type and a `pipeline()` listing its steps in order.

pub mod cluster;
pub mod common;
pub mod config;
pub mod role;

pub use cluster::ClusterContext;
pub use config::ConfigContext;
pub use role::RoleContext;
