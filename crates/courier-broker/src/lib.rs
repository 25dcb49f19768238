//! Courier broker: per-topic partitions with an in-memory FIFO, an
//! append-only log, visibility-timeout redelivery and an HTTP front end.
//!
//! The broker hosts a fixed set of topics declared at startup. Partitions are
//! created lazily on first produce. One broker is agnostic about the rest of
//! the deployment; partition ownership across brokers is the routing proxy's
//! concern.

pub mod broker;
pub mod config;
pub mod http;
pub mod partition;
pub mod storage;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use partition::Partition;
