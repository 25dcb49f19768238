//! Error types for Courier.

use thiserror::Error;

/// Result type alias for Courier operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Courier.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input from a client
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Partition in-memory queue is at capacity
    #[error("queue full ({capacity} messages)")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Partition has been shut down
    #[error("partition closed")]
    PartitionClosed,

    /// Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
