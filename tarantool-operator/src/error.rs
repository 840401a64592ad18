//! Error types for the Tarantool operator.

use tarantool_topology::TopologyError;
use thiserror::Error;

/// Errors that can occur during operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Cartridge topology error.
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Resource not found.
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
        /// Resource namespace.
        namespace: String,
    },

    /// The resource was modified since it was read.
    #[error("Conflict while updating {kind}/{name}")]
    Conflict {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// A required label is missing.
    #[error("{0} label is required")]
    MissingLabel(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// No pod can currently act as topology leader.
    #[error("no available leader")]
    NoAvailableLeader,

    /// Another reconcile recorded a leader first.
    #[error("leader election conflict")]
    LeaderElectionConflict,

    /// The recorded leader cannot serve admin calls.
    #[error("leader {leader} is not ready")]
    LeaderNotReady {
        /// Name of the recorded leader pod.
        leader: String,
    },
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

impl OperatorError {
    /// Builds a [`OperatorError::NotFound`].
    pub fn not_found(kind: &str, namespace: &str, name: &str) -> Self {
        OperatorError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Whether the error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        match self {
            OperatorError::Conflict { .. } => true,
            OperatorError::KubeError(kube::Error::Api(err)) => err.code == 409,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}
