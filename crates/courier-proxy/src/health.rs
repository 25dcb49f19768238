//! Broker health checking.
//!
//! A background sweep GETs `/health` on every known endpoint. The health map
//! is consulted on every routed request; transitions in either direction are
//! logged and counted. Brokers start out assumed healthy so a freshly
//! started proxy routes immediately.

use crate::stats::ProxyStats;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct HealthMonitor {
    endpoints: Vec<String>,
    healthy: RwLock<HashMap<String, bool>>,
    client: reqwest::Client,
    stats: Arc<ProxyStats>,
    interval: Duration,
    check_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        endpoints: Vec<String>,
        stats: Arc<ProxyStats>,
        interval: Duration,
        check_timeout: Duration,
    ) -> Self {
        let healthy = endpoints.iter().map(|e| (e.clone(), true)).collect();
        for endpoint in &endpoints {
            stats.record_broker_healthy(endpoint);
        }
        Self {
            endpoints,
            healthy: RwLock::new(healthy),
            client: reqwest::Client::new(),
            stats,
            interval,
            check_timeout,
        }
    }

    pub fn is_healthy(&self, endpoint: &str) -> bool {
        self.healthy.read().get(endpoint).copied().unwrap_or(false)
    }

    /// First healthy endpoint in broker-list order, if any.
    pub fn any_healthy(&self) -> Option<String> {
        let healthy = self.healthy.read();
        self.endpoints
            .iter()
            .find(|e| healthy.get(*e).copied().unwrap_or(false))
            .cloned()
    }

    pub fn healthy_count(&self) -> usize {
        self.healthy.read().values().filter(|h| **h).count()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn snapshot(&self) -> HashMap<String, bool> {
        self.healthy.read().clone()
    }

    /// Periodic sweep until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the interval's first tick is immediate; brokers were assumed
        // healthy at startup, so this validates the assumption right away
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {}
            }
            self.check_all().await;
        }
    }

    /// One sweep over every endpoint.
    pub async fn check_all(&self) {
        self.stats.record_health_check();
        for endpoint in &self.endpoints {
            let up = self.probe(endpoint).await;
            let was_up = {
                let mut healthy = self.healthy.write();
                let entry = healthy.entry(endpoint.clone()).or_insert(true);
                let was = *entry;
                *entry = up;
                was
            };
            if up {
                self.stats.record_broker_healthy(endpoint);
                if !was_up {
                    info!(broker = %endpoint, "broker recovered");
                }
            } else {
                self.stats.record_broker_unhealthy(endpoint);
                if was_up {
                    warn!(broker = %endpoint, "broker became unhealthy");
                    self.stats.record_broker_failure(endpoint);
                }
            }
        }
    }

    async fn probe(&self, endpoint: &str) -> bool {
        let url = format!("{}/health", endpoint);
        match self
            .client
            .get(&url)
            .timeout(self.check_timeout)
            .send()
            .await
        {
            Ok(response) => {
                let up = response.status() == reqwest::StatusCode::OK;
                debug!(broker = %endpoint, status = %response.status(), "health probe");
                up
            }
            Err(e) => {
                debug!(broker = %endpoint, "health probe failed: {}", e);
                false
            }
        }
    }
}
