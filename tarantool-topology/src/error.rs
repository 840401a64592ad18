//! Error types for the topology driver.

use crate::types::LuaError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when driving a Cartridge topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The exec channel could not run the script.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The exec call did not finish in time.
    #[error("Exec timed out after {0:?}")]
    Timeout(Duration),

    /// The console transcript did not have the expected framing.
    #[error("Unable to parse tarantool output: {0}")]
    Transcript(String),

    /// The script ran and raised an error.
    #[error("Remote script failed: {0}")]
    Remote(String),

    /// The payload did not match the expected result type.
    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// A Cartridge API call returned an error object.
    #[error("{context}: {source}")]
    Lua {
        /// What the driver was doing.
        context: &'static str,
        /// Error returned by Cartridge.
        #[source]
        source: LuaError,
    },

    /// Cartridge reported that the topology could not be edited.
    #[error("topology service is down")]
    TopologyIsDown,

    /// Replicaset is not present in the clusterwide config.
    #[error("not in config")]
    NotInConfig,

    /// The last storage replicaset would be left without weight.
    #[error("at least one vshard-storage (default) must have weight > 0")]
    LastStorageWeight,

    /// One of the requested roles is not known to the application.
    #[error("unknown role: {0}")]
    UnknownRole(LuaError),

    /// Clusterwide config patch was refused.
    #[error("failed to upload cartridge config")]
    ConfigRejected,
}

impl TopologyError {
    pub(crate) fn lua(context: &'static str, source: LuaError) -> Self {
        Self::Lua { context, source }
    }

    /// True when the script could not be run at all, as opposed to running
    /// and failing.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::Transcript(_)
        )
    }

    /// Returns the Cartridge error object, if any.
    pub fn lua_error(&self) -> Option<&LuaError> {
        match self {
            Self::Lua { source, .. } => Some(source),
            Self::UnknownRole(source) => Some(source),
            _ => None,
        }
    }
}

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification() {
        assert!(TopologyError::Transport("refused".into()).is_transport());
        assert!(TopologyError::Timeout(Duration::from_secs(2)).is_transport());
        assert!(TopologyError::Transcript("no match".into()).is_transport());
        assert!(!TopologyError::Remote("boom".into()).is_transport());
        assert!(!TopologyError::NotInConfig.is_transport());
    }

    #[test]
    fn lua_error_display_includes_context() {
        let err = TopologyError::lua(
            "unable to bootstrap cluster",
            LuaError {
                class_name: "Bootstrapping vshard failed".into(),
                err: "No remotes with role \"vshard-router\" available".into(),
                ..Default::default()
            },
        );

        assert_eq!(
            err.to_string(),
            "unable to bootstrap cluster: Bootstrapping vshard failed: No remotes with role \"vshard-router\" available"
        );
        assert!(err.lua_error().is_some());
    }
}
