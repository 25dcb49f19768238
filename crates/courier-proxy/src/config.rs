//! Proxy configuration and broker discovery.

use clap::Parser;
use courier_common::{Error, Result};
use std::time::Duration;

/// Command-line / environment configuration for the proxy binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "courier-proxy",
    about = "Courier routing proxy - consistent-hash routing across brokers",
    version
)]
pub struct Cli {
    /// Listen port
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Service name used to derive broker endpoint URLs
    #[arg(long, env = "BROKER_SERVICE", default_value = "msg-queue")]
    pub broker_service: String,

    /// Number of backend brokers to discover
    #[arg(long, env = "BROKER_COUNT", default_value = "1")]
    pub broker_count: u32,

    /// Explicit comma-separated broker endpoint list; overrides discovery
    #[arg(long, env = "BROKER_ENDPOINTS")]
    pub broker_endpoints: Option<String>,

    /// Virtual nodes per broker on the hash ring
    #[arg(long, env = "VIRTUAL_NODES", default_value = "150")]
    pub virtual_nodes: usize,

    /// Partitions per topic (must agree with producers and consumers)
    #[arg(long, env = "MAX_PARTITIONS", default_value = "2")]
    pub max_partitions: u32,

    /// Seconds between broker health sweeps
    #[arg(long, env = "HEALTH_INTERVAL_SECONDS", default_value = "30")]
    pub health_interval_seconds: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Resolve the CLI arguments into a proxy configuration, discovering
    /// broker endpoints from the service name when no explicit list is
    /// given.
    pub fn into_config(self) -> Result<ProxyConfig> {
        let endpoints = match &self.broker_endpoints {
            Some(list) => list
                .split(',')
                .map(|e| e.trim().trim_end_matches('/').to_string())
                .filter(|e| !e.is_empty())
                .collect(),
            None => discover_endpoints(&self.broker_service, self.broker_count),
        };
        if endpoints.is_empty() {
            return Err(Error::InvalidInput("no broker endpoints".to_string()));
        }
        Ok(ProxyConfig {
            endpoints,
            virtual_nodes: self.virtual_nodes,
            max_partitions: self.max_partitions,
            health_interval: Duration::from_secs(self.health_interval_seconds),
            ..ProxyConfig::default()
        })
    }
}

/// Build broker endpoint URLs from a service name. A single broker is
/// addressed through the service directly; a stateful set of N is addressed
/// as `<svc>-0.<svc>`, `<svc>-1.<svc>`, ...
fn discover_endpoints(service: &str, count: u32) -> Vec<String> {
    let short_name = service.split('.').next().unwrap_or(service);
    if count <= 1 {
        return vec![format!("http://{}:8080", short_name)];
    }
    (0..count)
        .map(|i| format!("http://{}-{}.{}:8080", short_name, i, service))
        .collect()
}

/// Runtime configuration for a [`crate::Proxy`].
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Backend broker endpoints, in discovery order.
    pub endpoints: Vec<String>,
    /// Virtual nodes per broker on the ring.
    pub virtual_nodes: usize,
    /// Partitions per topic, echoed in `/status`.
    pub max_partitions: u32,
    /// Period of the health-check sweep.
    pub health_interval: Duration,
    /// Per-probe timeout for health checks.
    pub health_check_timeout: Duration,
    /// Total timeout for non-streaming forwards (produce/ack/topics).
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            virtual_nodes: 150,
            max_partitions: 2,
            health_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}
