//! Consistent-hash ring with virtual nodes.
//!
//! Each broker occupies `virtual_nodes` positions on a 32-bit ring; a key is
//! served by the first broker position clockwise from its hash. Positions
//! derive from a SHA-512 digest, so the same broker set always yields the
//! same ring across restarts.

use sha2::{Digest, Sha512};
use std::collections::HashMap;

/// Immutable hash ring. Rebuild and swap the whole value when the broker set
/// changes.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// (position, broker index), sorted by position.
    positions: Vec<(u32, usize)>,
    brokers: Vec<String>,
    virtual_nodes: usize,
}

impl HashRing {
    /// Build a ring over `brokers` with `virtual_nodes` positions each.
    pub fn new(brokers: Vec<String>, virtual_nodes: usize) -> Self {
        let mut positions = Vec::with_capacity(brokers.len() * virtual_nodes);
        for (index, broker) in brokers.iter().enumerate() {
            for v in 0..virtual_nodes {
                positions.push((hash(&format!("{}:{}", broker, v)), index));
            }
        }
        positions.sort_unstable();
        Self {
            positions,
            brokers,
            virtual_nodes,
        }
    }

    /// Broker serving an arbitrary key, or `None` on an empty ring.
    pub fn broker_for_key(&self, key: &str) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }
        let target = hash(key);
        // first position >= target, wrapping to the start of the ring
        let mut idx = self.positions.partition_point(|(pos, _)| *pos < target);
        if idx == self.positions.len() {
            idx = 0;
        }
        Some(&self.brokers[self.positions[idx].1])
    }

    /// Broker serving a topic-partition. Different partitions of one topic
    /// spread across brokers because the key embeds both.
    pub fn broker_for_partition(&self, topic: &str, partition: u32) -> Option<&str> {
        self.broker_for_key(&format!("{}-partition-{}", topic, partition))
    }

    /// All brokers on the ring, in insertion order.
    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    /// Number of virtual nodes per broker.
    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// How partitions `0..max_partitions` distribute across brokers.
    pub fn partition_distribution(&self, max_partitions: u32) -> HashMap<String, Vec<u32>> {
        let mut distribution: HashMap<String, Vec<u32>> = HashMap::new();
        for partition in 0..max_partitions {
            if let Some(broker) = self.broker_for_key(&format!("partition-{}", partition)) {
                distribution
                    .entry(broker.to_string())
                    .or_default()
                    .push(partition);
            }
        }
        distribution
    }
}

/// First four bytes of the SHA-512 digest, big-endian.
fn hash(key: &str) -> u32 {
    let digest = Sha512::digest(key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brokers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://broker-{}:8080", i)).collect()
    }

    #[test]
    fn test_empty_ring_returns_none() {
        let ring = HashRing::new(Vec::new(), 150);
        assert!(ring.broker_for_key("anything").is_none());
    }

    #[test]
    fn test_lookups_are_deterministic() {
        let a = HashRing::new(brokers(3), 150);
        let b = HashRing::new(brokers(3), 150);
        for partition in 0..64 {
            assert_eq!(
                a.broker_for_partition("events", partition),
                b.broker_for_partition("events", partition)
            );
        }
    }

    #[test]
    fn test_repeated_lookup_same_broker() {
        let ring = HashRing::new(brokers(4), 150);
        let first = ring.broker_for_partition("events", 7).unwrap().to_string();
        for _ in 0..10 {
            assert_eq!(ring.broker_for_partition("events", 7).unwrap(), first);
        }
    }

    #[test]
    fn test_virtual_nodes_spread_load() {
        let ring = HashRing::new(brokers(3), 150);
        let distribution = ring.partition_distribution(64);
        // every broker owns a share; 150 virtual nodes keep it roughly even
        assert_eq!(distribution.len(), 3);
        for partitions in distribution.values() {
            assert!(
                partitions.len() >= 8,
                "skewed distribution: {:?}",
                distribution
            );
        }
    }

    #[test]
    fn test_adding_broker_moves_bounded_fraction() {
        let before = HashRing::new(brokers(3), 150);
        let after = HashRing::new(brokers(4), 150);

        let total = 400u32;
        let mut moved = 0;
        for partition in 0..total {
            let old = before.broker_for_partition("events", partition).unwrap();
            let new = after.broker_for_partition("events", partition).unwrap();
            if old != new {
                // keys only ever move to the new broker
                assert_eq!(new, "http://broker-3:8080");
                moved += 1;
            }
        }
        // theoretical share is 1/4; allow a factor of 2
        assert!(
            moved <= total / 2,
            "adding a broker moved {}/{} keys",
            moved,
            total
        );
        assert!(moved > 0, "new broker took no keys");
    }

    #[test]
    fn test_removing_broker_only_moves_its_keys() {
        let full = HashRing::new(brokers(4), 150);
        let mut remaining = brokers(4);
        let removed = remaining.remove(1);
        let reduced = HashRing::new(remaining, 150);

        for partition in 0..400 {
            let old = full.broker_for_partition("events", partition).unwrap();
            let new = reduced.broker_for_partition("events", partition).unwrap();
            if old != removed {
                assert_eq!(old, new, "partition {} moved without cause", partition);
            } else {
                assert_ne!(new, removed);
            }
        }
    }

    #[test]
    fn test_partitions_of_topic_spread_across_brokers() {
        let ring = HashRing::new(brokers(4), 150);
        let owners: std::collections::HashSet<String> = (0..16)
            .map(|p| ring.broker_for_partition("events", p).unwrap().to_string())
            .collect();
        assert!(owners.len() > 1, "all partitions landed on one broker");
    }

    #[test]
    fn test_hash_is_stable() {
        // pins the position derivation: first 4 bytes of SHA-512, big-endian
        let digest = Sha512::digest(b"http://broker-0:8080:0");
        let expected = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        assert_eq!(hash("http://broker-0:8080:0"), expected);
    }
}
