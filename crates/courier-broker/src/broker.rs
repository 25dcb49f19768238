//! Broker: topic registry and lazy partition creation.

use crate::config::BrokerConfig;
use crate::partition::{Partition, PartitionConfig};
use courier_common::{Error, Result, TopicPartition};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::info;

/// Hosts every partition of every topic declared to this broker. Partitions
/// are created on first produce; consume and ack never create.
pub struct Broker {
    topics: HashMap<String, u32>,
    partitions: RwLock<HashMap<TopicPartition, Arc<Partition>>>,
    config: BrokerConfig,
    started_at: Instant,
}

impl Broker {
    /// Create a broker for the topics declared in `config`. No partition
    /// state is touched until the first produce.
    pub fn new(config: BrokerConfig) -> Self {
        for (topic, count) in &config.topics {
            info!(topic = %topic, partitions = count, "topic registered");
        }
        Self {
            topics: config.topics.clone(),
            partitions: RwLock::new(HashMap::new()),
            config,
            started_at: Instant::now(),
        }
    }

    /// Look up a partition, creating it if `create_if_missing` and the index
    /// is within the topic's declared range.
    ///
    /// Two concurrent produces to the same nonexistent partition create it
    /// exactly once: creation re-checks under the write lock.
    pub async fn partition(
        &self,
        topic: &str,
        index: u32,
        create_if_missing: bool,
    ) -> Result<Arc<Partition>> {
        let declared = *self
            .topics
            .get(topic)
            .ok_or_else(|| Error::InvalidInput(format!("unknown topic {:?}", topic)))?;
        if index >= declared {
            return Err(Error::InvalidInput(format!(
                "partition {} exceeds max partitions {} for topic {}",
                index, declared, topic
            )));
        }

        let key = TopicPartition::new(topic, index);
        if let Some(partition) = self.partitions.read().await.get(&key) {
            return Ok(Arc::clone(partition));
        }

        if !create_if_missing {
            return Err(Error::NotFound(format!(
                "partition {} does not exist for topic {}",
                index, topic
            )));
        }

        let mut partitions = self.partitions.write().await;
        if let Some(partition) = partitions.get(&key) {
            return Ok(Arc::clone(partition));
        }
        let partition = Partition::open(
            &self.config.storage_dir,
            topic,
            index,
            PartitionConfig {
                queue_size: self.config.queue_size,
                visibility_timeout: self.config.visibility_timeout,
                poll_timeout: self.config.poll_timeout,
            },
        )
        .await?;
        partitions.insert(key, Arc::clone(&partition));
        Ok(partition)
    }

    /// Partition indices created so far, per topic, in ascending order.
    pub async fn owned_partitions(&self) -> HashMap<String, Vec<u32>> {
        let partitions = self.partitions.read().await;
        let mut owned: HashMap<String, Vec<u32>> = HashMap::new();
        for key in partitions.keys() {
            owned.entry(key.topic.clone()).or_default().push(key.partition);
        }
        for indices in owned.values_mut() {
            indices.sort_unstable();
        }
        owned
    }

    /// Total number of partitions created so far.
    pub async fn partition_count(&self) -> usize {
        self.partitions.read().await.len()
    }

    /// Declared topics and their partition counts.
    pub fn topics(&self) -> &HashMap<String, u32> {
        &self.topics
    }

    /// Seconds since the broker was constructed.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Close every partition. In-memory queues are discarded; log files
    /// persist.
    pub async fn close(&self) {
        let partitions = self.partitions.read().await;
        for partition in partitions.values() {
            partition.close();
        }
        info!(count = partitions.len(), "broker closed all partitions");
    }
}
