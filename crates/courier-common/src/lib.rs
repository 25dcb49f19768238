//! Common types shared across the Courier broker, proxy and client.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{generate_id, parse_topic_spec, Message, TopicPartition};
