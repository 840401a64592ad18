//! Operator configuration and logging setup.

use clap::Parser;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default log directives.
pub const DEFAULT_LOG_FILTER: &str = "tarantool_operator=info,tarantool_topology=info,kube=info";

/// Command line of the operator binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "tarantool-operator", version, about = "Kubernetes operator for Tarantool Cartridge")]
pub struct OperatorArgs {
    /// Print the CRD manifests and exit.
    #[arg(long)]
    pub generate_crds: bool,

    /// Namespace to watch. All namespaces when unset.
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Container running Tarantool in every instance pod.
    #[arg(long, env = "TARANTOOL_CONTAINER_NAME", default_value = "pod")]
    pub container_name: String,

    /// Time budget of a single admin call, in seconds.
    #[arg(long, env = "TARANTOOL_EXEC_TIMEOUT_SECS", default_value_t = 2)]
    pub exec_timeout_secs: u64,

    /// Log format: json, pretty or compact.
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Log filter directives.
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Runtime settings of the controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch.
    pub namespace: Option<String>,
    /// Tarantool container name.
    pub container_name: String,
    /// Admin call timeout.
    pub exec_timeout: Duration,
}

impl From<&OperatorArgs> for OperatorConfig {
    fn from(args: &OperatorArgs) -> Self {
        Self {
            namespace: args.namespace.clone().filter(|ns| !ns.is_empty()),
            container_name: args.container_name.clone(),
            exec_timeout: Duration::from_secs(args.exec_timeout_secs),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for structured logging.
    Json,
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    format: LogFormat,
    filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl LogConfig {
    /// Create configuration from environment variables.
    ///
    /// - `TARANTOOL_OPERATOR_LOG_FORMAT`: "json", "pretty", or "compact"
    /// - `TARANTOOL_OPERATOR_LOG_LEVEL` or `RUST_LOG`: log filter
    pub fn from_env() -> Self {
        let format = env::var("TARANTOOL_OPERATOR_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse::<LogFormat>().ok())
            .unwrap_or_else(|| {
                if std::io::IsTerminal::is_terminal(&std::io::stdout()) {
                    LogFormat::Pretty
                } else {
                    LogFormat::Json
                }
            });

        let filter = env::var("TARANTOOL_OPERATOR_LOG_LEVEL")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

        Self { format, filter }
    }

    /// Applies command line overrides.
    #[must_use]
    pub fn with_overrides(mut self, args: &OperatorArgs) -> Self {
        if let Some(format) = args.log_format {
            self.format = format;
        }
        if let Some(filter) = &args.log_level {
            self.filter = filter.clone();
        }
        self
    }

    /// Log format.
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Log filter.
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<()> {
    use anyhow::Context;

    let filter =
        EnvFilter::try_new(config.filter()).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match config.format() {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init(),
    }
    .context("Failed to initialize tracing subscriber")
}
