//! Producer / consumer client.

use crate::sse::{SseEvent, SseParser};
use async_trait::async_trait;
use courier_common::{Error, Message, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Client configuration. `max_partitions` must agree with the broker's
/// declared partition count for the topic.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Proxy (or broker) base URL, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// Topic to publish and subscribe to.
    pub topic: String,
    /// Consumer group label presented on consume and ack.
    pub group: String,
    /// Label used in logs to tell consumers apart.
    pub name: String,
    /// Partitions multiplexed by this client.
    pub max_partitions: u32,
    /// Total publish attempts before surfacing the error.
    pub publish_attempts: u32,
    /// Base of the linear publish backoff (attempt n sleeps n times this).
    pub publish_backoff: Duration,
    /// Ack retries after the first failed attempt.
    pub ack_retries: u32,
    /// Reconnect delay after a transport loss or 4xx response.
    pub reconnect_delay: Duration,
    /// Reconnect delay after a 5xx response.
    pub reconnect_delay_5xx: Duration,
    /// Timeout for produce/ack/topics requests. The consume stream has none.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        base_url: impl Into<String>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            topic: topic.into(),
            group: group.into(),
            name: "courier-client".to_string(),
            max_partitions: 2,
            publish_attempts: 3,
            publish_backoff: Duration::from_millis(500),
            ack_retries: 2,
            reconnect_delay: Duration::from_secs(1),
            reconnect_delay_5xx: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Message callback. Called concurrently from every partition task; a
/// returned error leaves the message unacked so the visibility timeout
/// redelivers it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &[u8], message_id: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(&str, &[u8], &str) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, topic: &str, payload: &[u8], message_id: &str) -> anyhow::Result<()> {
        (self)(topic, payload, message_id)
    }
}

/// Round-robin producer and per-partition consumer multiplexer.
pub struct QueueClient {
    config: ClientConfig,
    http: reqwest::Client,
    /// No total timeout; the consume stream is long-lived.
    stream_http: reqwest::Client,
    publish_counter: AtomicU64,
    shutdown: broadcast::Sender<()>,
}

impl QueueClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        let stream_http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            config,
            http,
            stream_http,
            publish_counter: AtomicU64::new(0),
            shutdown,
        })
    }

    /// Next partition in round-robin order.
    fn next_partition(&self) -> u32 {
        let n = self.publish_counter.fetch_add(1, Ordering::Relaxed);
        (n % self.config.max_partitions as u64) as u32
    }

    /// Publish a payload, spreading messages across partitions round-robin.
    /// Retries transport failures and 5xx responses with linear backoff;
    /// a 4xx response surfaces immediately.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let partition = self.next_partition();
        let url = format!(
            "{}/produce?topic={}&partition={}",
            self.config.base_url, topic, partition
        );
        let body = serde_json::json!({ "payload": String::from_utf8_lossy(payload) });
        debug!(name = %self.config.name, topic, partition, "publishing");

        let mut last_error = Error::Network("publish not attempted".to_string());
        for attempt in 1..=self.config.publish_attempts {
            match self.http.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    if status.is_client_error() {
                        return Err(Error::InvalidInput(format!(
                            "publish rejected with status {}: {}",
                            status, text
                        )));
                    }
                    last_error =
                        Error::Network(format!("publish failed with status {}: {}", status, text));
                }
                Err(e) => {
                    last_error = Error::Network(format!("publish failed: {}", e));
                }
            }
            if attempt < self.config.publish_attempts {
                tokio::time::sleep(self.config.publish_backoff * attempt).await;
            }
        }
        Err(last_error)
    }

    /// Consume the configured topic: one task per partition, each feeding
    /// the handler and acking on success. Returns when [`Self::shutdown`]
    /// fires, or with the first unrecoverable error a task reports.
    pub async fn subscribe<H>(&self, handler: H) -> Result<()>
    where
        H: MessageHandler + 'static,
    {
        let handler = Arc::new(handler);
        let (err_tx, mut err_rx) = mpsc::channel::<Error>(1);

        let mut tasks = Vec::new();
        for partition in 0..self.config.max_partitions {
            let worker = PartitionWorker {
                config: self.config.clone(),
                http: self.http.clone(),
                stream_http: self.stream_http.clone(),
                handler: Arc::clone(&handler) as Arc<dyn MessageHandler>,
                err_tx: err_tx.clone(),
                shutdown: self.shutdown.clone(),
            };
            tasks.push(tokio::spawn(worker.run(partition)));
        }
        drop(err_tx);

        let mut shutdown = self.shutdown.subscribe();
        let result = tokio::select! {
            _ = shutdown.recv() => Ok(()),
            reported = err_rx.recv() => match reported {
                Some(error) => {
                    // tear the rest of the tasks down before surfacing
                    let _ = self.shutdown.send(());
                    Err(error)
                }
                None => Ok(()),
            },
        };
        for task in tasks {
            let _ = task.await;
        }
        result
    }

    /// Stop every subscribe task of this client.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Acknowledge a message once; no retries.
    pub async fn ack(&self, topic: &str, partition: u32, message_id: &str) -> Result<()> {
        ack_once(
            &self.http,
            &self.config.base_url,
            topic,
            partition,
            &self.config.group,
            message_id,
        )
        .await
    }

    /// Partition indices known to the broker, per topic.
    pub async fn topics(&self) -> Result<HashMap<String, Vec<u32>>> {
        let url = format!("{}/topics", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("get topics failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "get topics failed with status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))
    }
}

async fn ack_once(
    http: &reqwest::Client,
    base_url: &str,
    topic: &str,
    partition: u32,
    group: &str,
    message_id: &str,
) -> Result<()> {
    let url = format!(
        "{}/ack?topic={}&partition={}&group={}",
        base_url, topic, partition, group
    );
    let response = http
        .post(&url)
        .json(&serde_json::json!({ "id": message_id }))
        .send()
        .await
        .map_err(|e| Error::Network(format!("ack failed: {}", e)))?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let text = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        Err(Error::InvalidInput(format!(
            "ack rejected with status {}: {}",
            status, text
        )))
    } else {
        Err(Error::Network(format!(
            "ack failed with status {}: {}",
            status, text
        )))
    }
}

/// What a finished consume attempt means for the reconnect loop.
enum ConsumeOutcome {
    Retry(Duration),
    Fatal(Error),
}

struct PartitionWorker {
    config: ClientConfig,
    http: reqwest::Client,
    stream_http: reqwest::Client,
    handler: Arc<dyn MessageHandler>,
    err_tx: mpsc::Sender<Error>,
    shutdown: broadcast::Sender<()>,
}

impl PartitionWorker {
    async fn run(self, partition: u32) {
        let url = format!(
            "{}/consume?topic={}&partition={}&group={}",
            self.config.base_url, self.config.topic, partition, self.config.group
        );
        info!(
            name = %self.config.name,
            topic = %self.config.topic,
            partition,
            group = %self.config.group,
            "consumer task started"
        );
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let outcome = tokio::select! {
                _ = shutdown.recv() => return,
                outcome = self.consume_once(&url, partition) => outcome,
            };
            match outcome {
                ConsumeOutcome::Fatal(error) => {
                    let _ = self.err_tx.send(error).await;
                    return;
                }
                ConsumeOutcome::Retry(delay) => {
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One connection attempt plus its stream, until the stream ends.
    async fn consume_once(&self, url: &str, partition: u32) -> ConsumeOutcome {
        let response = match self.stream_http.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return ConsumeOutcome::Fatal(Error::Network(format!(
                    "cannot build consume request: {}",
                    e
                )));
            }
            Err(e) => {
                debug!(partition, "consume connect failed: {}", e);
                return ConsumeOutcome::Retry(self.config.reconnect_delay);
            }
        };

        let status = response.status();
        if !status.is_success() {
            // a 400 here is routine at startup: the partition appears once
            // the first produce creates it
            debug!(partition, %status, "consume rejected, will reconnect");
            let delay = if status.is_server_error() {
                self.config.reconnect_delay_5xx
            } else {
                self.config.reconnect_delay
            };
            return ConsumeOutcome::Retry(delay);
        }

        debug!(partition, "consume stream established");
        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    debug!(partition, "consume stream error: {}", e);
                    break;
                }
            };
            for event in parser.feed(&chunk) {
                self.dispatch(event, partition).await;
            }
        }
        ConsumeOutcome::Retry(self.config.reconnect_delay)
    }

    async fn dispatch(&self, event: SseEvent, partition: u32) {
        let message: Message = match serde_json::from_str(&event.data) {
            Ok(message) => message,
            Err(e) => {
                warn!(partition, "failed to decode message: {}", e);
                return;
            }
        };
        match self
            .handler
            .handle(&message.topic, message.payload.as_bytes(), &message.id)
            .await
        {
            Ok(()) => {
                if let Err(e) = self.ack_with_retry(&message).await {
                    warn!(id = %message.id, "failed to ack: {}", e);
                }
            }
            Err(e) => {
                // no ack; the visibility timeout redelivers
                warn!(id = %message.id, "handler error, message will redeliver: {}", e);
            }
        }
    }

    async fn ack_with_retry(&self, message: &Message) -> Result<()> {
        let mut last_error = Error::Network("ack not attempted".to_string());
        for attempt in 0..=self.config.ack_retries {
            match ack_once(
                &self.http,
                &self.config.base_url,
                &message.topic,
                message.partition,
                &self.config.group,
                &message.id,
            )
            .await
            {
                Ok(()) => return Ok(()),
                // a rejected ack (unknown id / wrong group) never succeeds
                // on retry
                Err(error @ Error::InvalidInput(_)) => return Err(error),
                Err(error) => last_error = error,
            }
            if attempt < self.config.ack_retries {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_partition_assignment() {
        let mut config = ClientConfig::new("http://localhost:8080", "t", "g");
        config.max_partitions = 3;
        let client = QueueClient::new(config).unwrap();
        let sequence: Vec<u32> = (0..7).map(|_| client.next_partition()).collect();
        assert_eq!(sequence, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = ClientConfig::new("http://localhost:8080/", "t", "g");
        assert_eq!(config.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new("http://localhost:8080", "t", "g");
        assert_eq!(config.publish_attempts, 3);
        assert_eq!(config.ack_retries, 2);
        assert_eq!(config.max_partitions, 2);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect_delay_5xx, Duration::from_secs(5));
    }
}
