//! Execution channel into a running instance.

use crate::codec;
use crate::error::{Result, TopologyError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::AttachParams;
use kube::{Api, ResourceExt};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Default time budget of a single exec call.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs a Lua script inside an instance and returns its JSON result.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs `script` on `pod` with `args` available as `...`.
    async fn exec(&self, pod: &Pod, script: &str, args: &[Value]) -> Result<Value>;
}

/// Transport over the Kubernetes `pods/exec` subresource.
///
/// # Example
///
/// ```no_run
/// use tarantool_topology::PodExec;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = kube::Client::try_default().await?;
/// let transport = PodExec::new(client)
///     .with_container("pod")
///     .with_timeout(Duration::from_secs(5));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PodExec {
    client: kube::Client,
    container: Option<String>,
    timeout: Duration,
}

impl PodExec {
    /// Creates a transport using the pod's default container.
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            container: None,
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    /// Runs commands in the named container.
    #[must_use]
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, pod: &Pod, command: codec::Command) -> Result<String> {
        let namespace = pod.namespace().unwrap_or_default();
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);

        let mut params = AttachParams::default()
            .stdin(true)
            .stdout(true)
            .stderr(false);
        if let Some(container) = &self.container {
            params = params.container(container.clone());
        }

        let mut process = pods
            .exec(&pod.name_any(), command.argv, &params)
            .await
            .map_err(|e| TopologyError::Transport(e.to_string()))?;

        let mut stdin = process
            .stdin()
            .ok_or_else(|| TopologyError::Transport("stdin is not attached".into()))?;
        stdin
            .write_all(command.stdin.as_bytes())
            .await
            .map_err(|e| TopologyError::Transport(e.to_string()))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| TopologyError::Transport(e.to_string()))?;
        drop(stdin);

        let mut stdout = process
            .stdout()
            .ok_or_else(|| TopologyError::Transport("stdout is not attached".into()))?;
        let mut transcript = String::new();
        stdout
            .read_to_string(&mut transcript)
            .await
            .map_err(|e| TopologyError::Transport(e.to_string()))?;
        drop(stdout);

        process
            .join()
            .await
            .map_err(|e| TopologyError::Transport(e.to_string()))?;

        Ok(transcript)
    }
}

#[async_trait]
impl Transport for PodExec {
    async fn exec(&self, pod: &Pod, script: &str, args: &[Value]) -> Result<Value> {
        let command = codec::encode(script, args)?;

        tracing::trace!(pod = %pod.name_any(), "Executing lua in instance");

        let transcript = tokio::time::timeout(self.timeout, self.run(pod, command))
            .await
            .map_err(|_| TopologyError::Timeout(self.timeout))??;

        codec::decode(&transcript)
    }
}
