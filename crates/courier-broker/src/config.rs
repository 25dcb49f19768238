//! Broker configuration.

use clap::Parser;
use courier_common::{parse_topic_spec, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line / environment configuration for the broker binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "courier-broker",
    about = "Courier message broker - partitioned HTTP pub/sub with SSE consume",
    version
)]
pub struct Cli {
    /// Listen port
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// In-memory queue capacity per partition
    #[arg(long, env = "QUEUE_SIZE", default_value = "2000")]
    pub queue_size: usize,

    /// Visibility timeout for in-flight messages (e.g. "30s", "500ms" or plain seconds)
    #[arg(long, env = "VISIBILITY_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub visibility_timeout: Duration,

    /// Comma-separated topic declarations, `<name>:<partitions>`
    #[arg(long, env = "TOPICS", default_value = "events:8,orders:4,default:8")]
    pub topics: String,

    /// Root directory for per-partition log files
    #[arg(long, env = "STORAGE_DIR", default_value = "./data")]
    pub storage_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Resolve the CLI arguments into a broker configuration.
    pub fn into_config(self) -> Result<BrokerConfig> {
        let topics = parse_topic_spec(&self.topics)?;
        Ok(BrokerConfig {
            topics,
            storage_dir: self.storage_dir,
            queue_size: self.queue_size,
            visibility_timeout: self.visibility_timeout,
            ..BrokerConfig::default()
        })
    }
}

/// Runtime configuration for a [`crate::Broker`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Declared topics and their partition counts.
    pub topics: HashMap<String, u32>,
    /// Root of per-partition log files.
    pub storage_dir: PathBuf,
    /// In-memory queue capacity per partition.
    pub queue_size: usize,
    /// How long a delivered message stays invisible before redelivery.
    pub visibility_timeout: Duration,
    /// How long a single fetch waits for a message before returning empty.
    pub poll_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topics: HashMap::new(),
            storage_dir: PathBuf::from("./data"),
            queue_size: 2000,
            visibility_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(5),
        }
    }
}

/// Parse a duration given as plain seconds (`30`), seconds with a suffix
/// (`30s`) or milliseconds (`500ms`).
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| format!("bad duration {:?}: {}", value, e));
    }
    let secs = value.strip_suffix('s').unwrap_or(value).trim();
    secs.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("bad duration {:?}: {}", value, e))
}
