//! Courier proxy: a stateless router in front of N brokers.
//!
//! Presents the same HTTP surface as a broker and forwards each request to
//! the broker that a consistent-hash ring assigns to the request's
//! `(topic, partition)`. Keeps a health map and per-broker statistics; the
//! ring itself is immutable and swapped wholesale on broker-set changes.

pub mod config;
pub mod health;
pub mod proxy;
pub mod ring;
pub mod stats;

pub use config::ProxyConfig;
pub use health::HealthMonitor;
pub use proxy::Proxy;
pub use ring::HashRing;
pub use stats::{ProxyStats, RequestKind};
