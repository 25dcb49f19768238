//! A single partition: bounded in-memory FIFO, append-only log file and
//! visibility-timeout tracking for in-flight messages.
//!
//! Message lifecycle: `enqueue` appends to the log and pushes onto the queue;
//! `fetch_and_track` hands the head of the queue to a consumer group and
//! parks it in the pending set; `ack` settles it. A monitor task requeues
//! pending messages whose deadline elapsed. A message requeued this way
//! rejoins at the tail.

use courier_common::{Error, Message, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// In-flight delivery record. The recorded group must match on ack.
#[derive(Debug, Clone)]
struct PendingEntry {
    message: Message,
    deadline: Instant,
    group: String,
}

/// Tunables for a single partition, derived from the broker config.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub queue_size: usize,
    pub visibility_timeout: Duration,
    pub poll_timeout: Duration,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            queue_size: 2000,
            visibility_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(5),
        }
    }
}

/// One FIFO of a topic, owned exclusively by its broker.
#[derive(Debug)]
pub struct Partition {
    topic: String,
    index: u32,
    config: PartitionConfig,
    /// Tail of the in-memory queue. Requeues go through the same sender.
    tx: mpsc::Sender<Message>,
    /// Head of the in-memory queue; one fetcher at a time.
    rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    /// Delivered-but-unacked messages keyed by id.
    pending: Mutex<HashMap<String, PendingEntry>>,
    /// Append-only log; writes are serialized per partition.
    log: tokio::sync::Mutex<File>,
    log_path: PathBuf,
    shutdown: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl Partition {
    /// Open (or create) the partition's log file under
    /// `<storage>/<topic>/partition-<index>.log` and start the pending
    /// monitor. The returned partition is live until [`Partition::close`].
    pub async fn open(
        storage_dir: &Path,
        topic: &str,
        index: u32,
        config: PartitionConfig,
    ) -> Result<Arc<Self>> {
        let dir = storage_dir.join(topic);
        tokio::fs::create_dir_all(&dir).await?;
        let log_path = dir.join(format!("partition-{}.log", index));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?;

        let (tx, rx) = mpsc::channel(config.queue_size);
        let (shutdown, _) = broadcast::channel(1);

        let partition = Arc::new(Self {
            topic: topic.to_string(),
            index,
            config,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            pending: Mutex::new(HashMap::new()),
            log: tokio::sync::Mutex::new(file),
            log_path,
            shutdown,
            closed: AtomicBool::new(false),
        });

        let monitor = Arc::clone(&partition);
        let monitor_shutdown = partition.shutdown.subscribe();
        tokio::spawn(async move { monitor.run_monitor(monitor_shutdown).await });

        info!(topic = %partition.topic, partition = partition.index, "partition opened");
        Ok(partition)
    }

    /// Append the message to the log, then push it onto the in-memory queue.
    ///
    /// The log append happens first and without fsync; if it fails the
    /// message is not enqueued. If the append succeeds but the queue is at
    /// capacity the call fails with [`Error::QueueFull`] and the log line is
    /// left behind as an orphan (accepted recovery material, not a
    /// transactional journal).
    pub async fn enqueue(&self, message: Message) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PartitionClosed);
        }

        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        {
            let mut log = self.log.lock().await;
            log.write_all(&line).await?;
            log.flush().await?;
        }

        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(
                    topic = %self.topic,
                    partition = self.index,
                    id = %message.id,
                    "queue full, rejecting message"
                );
                Err(Error::QueueFull {
                    capacity: self.config.queue_size,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::PartitionClosed),
        }
    }

    /// Wait up to the poll timeout for a message, recording it as pending
    /// for `group` on receipt.
    ///
    /// Returns `Ok(None)` on an empty poll so the consume loop can check for
    /// cancellation, and [`Error::PartitionClosed`] once the partition shuts
    /// down.
    pub async fn fetch_and_track(&self, group: &str) -> Result<Option<Message>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PartitionClosed);
        }
        let mut shutdown = self.shutdown.subscribe();
        let mut rx = self.rx.lock().await;

        tokio::select! {
            _ = shutdown.recv() => Err(Error::PartitionClosed),
            received = rx.recv() => match received {
                Some(message) => {
                    let deadline = Instant::now() + self.config.visibility_timeout;
                    self.pending.lock().insert(
                        message.id.clone(),
                        PendingEntry {
                            message: message.clone(),
                            deadline,
                            group: group.to_string(),
                        },
                    );
                    Ok(Some(message))
                }
                None => Err(Error::PartitionClosed),
            },
            _ = tokio::time::sleep(self.config.poll_timeout) => Ok(None),
        }
    }

    /// Settle a pending message. Succeeds only if the id is pending and was
    /// dispatched to the same consumer group; otherwise no side effect.
    pub fn ack(&self, id: &str, group: &str) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(id) {
            Some(entry) if entry.group == group => {
                pending.remove(id);
                debug!(topic = %self.topic, partition = self.index, id, "acked");
                true
            }
            _ => false,
        }
    }

    /// Requeue scanner: every half visibility-timeout, move expired pending
    /// entries back to the queue tail. A message that cannot be requeued
    /// because the queue is full is dropped from memory; its log line
    /// remains.
    async fn run_monitor(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let tick = (self.config.visibility_timeout / 2).max(Duration::from_millis(100));
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = interval.tick() => {}
            }

            let now = Instant::now();
            let expired: Vec<PendingEntry> = {
                let mut pending = self.pending.lock();
                let ids: Vec<String> = pending
                    .iter()
                    .filter(|(_, entry)| now >= entry.deadline)
                    .map(|(id, _)| id.clone())
                    .collect();
                ids.into_iter()
                    .filter_map(|id| pending.remove(&id))
                    .collect()
            };

            for entry in expired {
                let id = entry.message.id.clone();
                info!(
                    topic = %self.topic,
                    partition = self.index,
                    id = %id,
                    group = %entry.group,
                    "visibility timeout, requeueing"
                );
                if self.tx.try_send(entry.message).is_err() {
                    warn!(
                        topic = %self.topic,
                        partition = self.index,
                        id = %id,
                        "cannot requeue, queue full; message dropped from memory"
                    );
                }
            }
        }
    }

    /// Shut the partition down: wakes any fetch waiter with
    /// [`Error::PartitionClosed`] and stops the monitor. The log file
    /// persists.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(());
        info!(topic = %self.topic, partition = self.index, "partition closed");
    }

    /// Topic this partition belongs to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition index within the topic.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Path of the append-only log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Number of delivered-but-unacked messages.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for Partition {
    fn drop(&mut self) {
        self.close();
    }
}
