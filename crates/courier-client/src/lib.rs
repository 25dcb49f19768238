//! Client library for the Courier message broker.
//!
//! [`QueueClient`] multiplexes a topic's partitions: `publish` spreads
//! messages round-robin, `subscribe` runs one consumer task per partition,
//! parsing the broker's SSE stream and acknowledging messages whose handler
//! succeeded. Unacked messages come back via the broker's visibility
//! timeout, so handlers must be idempotent.

pub mod client;
pub mod sse;

pub use client::{ClientConfig, MessageHandler, QueueClient};
pub use sse::{SseEvent, SseParser};
