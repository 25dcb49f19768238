//! Common types used throughout Courier.

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The unit of transfer. Fields are immutable once the message is emitted;
/// the same JSON encoding appears on the wire, in SSE `data:` lines and in
/// partition log files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Broker-generated opaque identifier, URL-safe.
    pub id: String,
    /// Opaque payload, bounded by the HTTP body limit.
    pub payload: String,
    /// Wall-clock creation time (UTC). Not required to be monotonic.
    pub created_at: DateTime<Utc>,
    /// Topic the message was produced to.
    pub topic: String,
    /// Partition index within the topic.
    pub partition: u32,
}

impl Message {
    /// Create a new message with a fresh id and the current timestamp.
    pub fn new(topic: impl Into<String>, partition: u32, payload: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            payload: payload.into(),
            created_at: Utc::now(),
            topic: topic.into(),
            partition,
        }
    }
}

/// Topic and partition identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Generate a URL-safe random id (~22 chars, 128 bits of randomness).
pub fn generate_id() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Parse a comma-separated `<name>:<partitions>` topic list, e.g.
/// `"events:8,orders:4"`. Malformed tuples are skipped.
pub fn parse_topic_spec(spec: &str) -> crate::Result<HashMap<String, u32>> {
    let mut topics = HashMap::new();
    for tuple in spec.split(',') {
        if tuple.is_empty() {
            continue;
        }
        let mut parts = tuple.splitn(2, ':');
        let name = match parts.next() {
            Some(n) if !n.is_empty() => n.trim(),
            _ => continue,
        };
        let count = match parts.next().and_then(|c| c.trim().parse::<u32>().ok()) {
            Some(c) if c > 0 => c,
            _ => continue,
        };
        topics.insert(name.to_string(), count);
    }
    if topics.is_empty() {
        return Err(crate::Error::InvalidInput(format!(
            "no valid topics in spec {:?}",
            spec
        )));
    }
    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_url_safe() {
        let id = generate_id();
        assert_eq!(id.len(), 22);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generate_id_is_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_message_json_roundtrip() {
        let msg = Message::new("events", 3, "温度=42.5°C ✓");
        let line = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&line).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_message_wire_field_names() {
        let msg = Message::new("events", 0, "hello");
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        let obj = value.as_object().unwrap();
        for field in ["id", "payload", "created_at", "topic", "partition"] {
            assert!(obj.contains_key(field), "missing field {}", field);
        }
        assert_eq!(obj.len(), 5);
        // created_at must be RFC3339 so foreign consumers can parse it
        let ts = obj["created_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_parse_topic_spec() {
        let topics = parse_topic_spec("events:8,orders:4,default:8").unwrap();
        assert_eq!(topics.len(), 3);
        assert_eq!(topics["events"], 8);
        assert_eq!(topics["orders"], 4);
        assert_eq!(topics["default"], 8);
    }

    #[test]
    fn test_parse_topic_spec_skips_malformed() {
        let topics = parse_topic_spec("events:8,,bad,orders:x,ok:2").unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics["events"], 8);
        assert_eq!(topics["ok"], 2);
    }

    #[test]
    fn test_parse_topic_spec_rejects_empty() {
        assert!(parse_topic_spec("").is_err());
        assert!(parse_topic_spec("nonsense").is_err());
    }
}
