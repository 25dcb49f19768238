//! Request statistics and Prometheus export.
//!
//! Per-type counters are plain atomics on the request path; the per-broker
//! maps sit behind a short-lived lock. The `/stats` JSON snapshot and the
//! `/metrics` text export both read without blocking writers for long.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec, Counter,
    CounterVec, GaugeVec, HistogramVec,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

lazy_static! {
    static ref PROXY_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "courier_proxy_requests_total",
        "Total requests forwarded by the proxy",
        &["type", "status"]
    )
    .unwrap();
    static ref PROXY_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "courier_proxy_request_duration_seconds",
        "Forwarded request latency",
        &["type"]
    )
    .unwrap();
    static ref PROXY_BROKER_REQUESTS: CounterVec = register_counter_vec!(
        "courier_proxy_broker_requests_total",
        "Requests per target broker",
        &["broker", "status"]
    )
    .unwrap();
    static ref PROXY_BROKER_HEALTHY: GaugeVec = register_gauge_vec!(
        "courier_proxy_broker_healthy",
        "Broker health as seen by the proxy (1=healthy)",
        &["broker"]
    )
    .unwrap();
    static ref PROXY_HEALTH_CHECKS: Counter = register_counter!(
        "courier_proxy_health_checks_total",
        "Health check sweeps performed"
    )
    .unwrap();
}

/// Kind of request being forwarded, for the per-type breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Produce,
    Consume,
    Ack,
    Topics,
    Health,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Produce => "produce",
            RequestKind::Consume => "consume",
            RequestKind::Ack => "ack",
            RequestKind::Topics => "topics",
            RequestKind::Health => "health",
        }
    }
}

/// Proxy-wide counters.
pub struct ProxyStats {
    started_at: Instant,

    total_requests: AtomicU64,
    produce_requests: AtomicU64,
    consume_requests: AtomicU64,
    ack_requests: AtomicU64,
    topics_requests: AtomicU64,
    health_requests: AtomicU64,

    successful_requests: AtomicU64,
    failed_requests: AtomicU64,

    total_latency_ms: AtomicU64,
    request_count: AtomicU64,

    health_check_count: AtomicU64,
    broker_failures: AtomicU64,

    broker_requests: Mutex<HashMap<String, u64>>,
    broker_errors: Mutex<HashMap<String, u64>>,
}

impl ProxyStats {
    pub fn new(endpoints: &[String]) -> Self {
        let zeroed: HashMap<String, u64> = endpoints.iter().map(|e| (e.clone(), 0)).collect();
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            produce_requests: AtomicU64::new(0),
            consume_requests: AtomicU64::new(0),
            ack_requests: AtomicU64::new(0),
            topics_requests: AtomicU64::new(0),
            health_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
            health_check_count: AtomicU64::new(0),
            broker_failures: AtomicU64::new(0),
            broker_requests: Mutex::new(zeroed.clone()),
            broker_errors: Mutex::new(zeroed),
        }
    }

    /// Record one forwarded request.
    pub fn record_request(
        &self,
        kind: RequestKind,
        broker: &str,
        latency: Duration,
        success: bool,
    ) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let per_type = match kind {
            RequestKind::Produce => &self.produce_requests,
            RequestKind::Consume => &self.consume_requests,
            RequestKind::Ack => &self.ack_requests,
            RequestKind::Topics => &self.topics_requests,
            RequestKind::Health => &self.health_requests,
        };
        per_type.fetch_add(1, Ordering::Relaxed);

        let status = if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
            "success"
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            "failure"
        };

        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.request_count.fetch_add(1, Ordering::Relaxed);

        {
            let mut map = if success {
                self.broker_requests.lock()
            } else {
                self.broker_errors.lock()
            };
            *map.entry(broker.to_string()).or_insert(0) += 1;
        }

        PROXY_REQUESTS_TOTAL
            .with_label_values(&[kind.as_str(), status])
            .inc();
        PROXY_REQUEST_DURATION
            .with_label_values(&[kind.as_str()])
            .observe(latency.as_secs_f64());
        PROXY_BROKER_REQUESTS
            .with_label_values(&[broker, status])
            .inc();
    }

    /// Record one health-check sweep.
    pub fn record_health_check(&self) {
        self.health_check_count.fetch_add(1, Ordering::Relaxed);
        PROXY_HEALTH_CHECKS.inc();
    }

    /// Record a healthy-to-unhealthy transition for `broker`.
    pub fn record_broker_failure(&self, broker: &str) {
        self.broker_failures.fetch_add(1, Ordering::Relaxed);
        PROXY_BROKER_HEALTHY.with_label_values(&[broker]).set(0.0);
    }

    /// Reflect a broker probing unhealthy (gauge only, no transition).
    pub fn record_broker_unhealthy(&self, broker: &str) {
        PROXY_BROKER_HEALTHY.with_label_values(&[broker]).set(0.0);
    }

    /// Record a broker reported healthy.
    pub fn record_broker_healthy(&self, broker: &str) {
        PROXY_BROKER_HEALTHY.with_label_values(&[broker]).set(1.0);
    }

    pub fn broker_failures(&self) -> u64 {
        self.broker_failures.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// The `/stats` JSON blob.
    pub fn snapshot(&self, healthy_brokers: usize, total_brokers: usize) -> serde_json::Value {
        let uptime = self.started_at.elapsed();
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let latency_ms = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count.load(Ordering::Relaxed);

        let avg_latency_ms = if count > 0 {
            latency_ms as f64 / count as f64
        } else {
            0.0
        };
        let success_rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let requests_per_second = if uptime.as_secs_f64() > 0.0 {
            total as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };

        serde_json::json!({
            "uptime_seconds": uptime.as_secs_f64(),
            "total_requests": total,
            "successful_requests": successful,
            "failed_requests": failed,
            "success_rate_percent": success_rate,
            "requests_per_second": requests_per_second,
            "average_latency_ms": avg_latency_ms,
            "request_breakdown": {
                "produce": self.produce_requests.load(Ordering::Relaxed),
                "consume": self.consume_requests.load(Ordering::Relaxed),
                "ack": self.ack_requests.load(Ordering::Relaxed),
                "topics": self.topics_requests.load(Ordering::Relaxed),
                "health": self.health_requests.load(Ordering::Relaxed),
            },
            "broker_distribution": {
                "request_counts": self.broker_requests.lock().clone(),
                "error_counts": self.broker_errors.lock().clone(),
                "healthy_count": healthy_brokers,
                "total_count": total_brokers,
            },
            "health_monitoring": {
                "health_checks_performed": self.health_check_count.load(Ordering::Relaxed),
                "broker_failures_detected": self.broker_failures.load(Ordering::Relaxed),
            },
            "timestamp": chrono::Utc::now(),
        })
    }
}
