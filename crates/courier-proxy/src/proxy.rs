//! Request routing and forwarding.
//!
//! Every data-path request resolves `(topic, partition)` through the ring,
//! falls back to any healthy broker if the ring's answer is marked down, and
//! forwards the request verbatim. Responses stream back unchanged, which is
//! what keeps `/consume` SSE framing intact through the proxy.

use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::ring::HashRing;
use crate::stats::{ProxyStats, RequestKind};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use parking_lot::RwLock;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub struct Proxy {
    config: ProxyConfig,
    ring: RwLock<Arc<HashRing>>,
    health: Arc<HealthMonitor>,
    stats: Arc<ProxyStats>,
    /// Pooled client for produce/ack/topics forwards.
    client: reqwest::Client,
    /// Client without a total-request timeout; consume streams are long-lived.
    stream_client: reqwest::Client,
    shutdown: broadcast::Sender<()>,
}

impl Proxy {
    pub fn new(config: ProxyConfig) -> courier_common::Result<Arc<Self>> {
        let stats = Arc::new(ProxyStats::new(&config.endpoints));
        let health = Arc::new(HealthMonitor::new(
            config.endpoints.clone(),
            Arc::clone(&stats),
            config.health_interval,
            config.health_check_timeout,
        ));
        let ring = HashRing::new(config.endpoints.clone(), config.virtual_nodes);
        for (broker, partitions) in ring.partition_distribution(config.max_partitions) {
            info!(broker = %broker, partitions = ?partitions, "ring assignment");
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| courier_common::Error::Network(e.to_string()))?;
        let stream_client = reqwest::Client::builder()
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| courier_common::Error::Network(e.to_string()))?;

        let (shutdown, _) = broadcast::channel(1);
        Ok(Arc::new(Self {
            config,
            ring: RwLock::new(Arc::new(ring)),
            health,
            stats,
            client,
            stream_client,
            shutdown,
        }))
    }

    /// Spawn the periodic health sweep. Stops when [`Proxy::stop`] fires.
    pub fn start_health_monitor(self: &Arc<Self>) {
        let monitor = Arc::clone(&self.health);
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move { monitor.run(shutdown).await });
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    /// Current ring; an `Arc` clone, stable for the duration of a request.
    pub fn ring(&self) -> Arc<HashRing> {
        Arc::clone(&self.ring.read())
    }

    /// Replace the broker set, rebuilding the ring atomically.
    pub fn rebuild_ring(&self, endpoints: Vec<String>) {
        let ring = HashRing::new(endpoints, self.config.virtual_nodes);
        *self.ring.write() = Arc::new(ring);
        info!("hash ring rebuilt");
    }

    /// Ring answer for a topic-partition, diverted to any healthy broker
    /// when the assigned one is down.
    pub fn broker_for_partition(&self, topic: &str, partition: u32) -> Option<String> {
        let ring = self.ring();
        let assigned = ring.broker_for_partition(topic, partition)?;
        if self.health.is_healthy(assigned) {
            return Some(assigned.to_string());
        }
        self.health.any_healthy()
    }

    /// Build the proxy's router.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/produce", post(produce))
            .route("/consume", get(consume))
            .route("/ack", post(ack))
            .route("/topics", get(topics))
            .route("/health", get(health))
            .route("/status", get(status))
            .route("/stats", get(stats))
            .route("/metrics", get(metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Forward a request to `target_url` and stream the response back.
    async fn forward(
        &self,
        kind: RequestKind,
        target: &str,
        target_url: String,
        method: Method,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Response {
        let start = Instant::now();
        debug!(kind = kind.as_str(), url = %target_url, "forwarding");

        let client = if kind == RequestKind::Consume {
            &self.stream_client
        } else {
            &self.client
        };
        let mut request = client.request(method, &target_url);
        for (name, value) in headers.iter() {
            if name != header::HOST {
                request = request.header(name, value);
            }
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let success = status.as_u16() < 400;
                self.stats
                    .record_request(kind, target, start.elapsed(), success);
                if !success {
                    warn!(kind = kind.as_str(), %status, broker = %target, "forward failed upstream");
                }

                let mut builder = Response::builder().status(status);
                for (name, value) in response.headers() {
                    // the body is re-streamed, so framing headers do not carry over
                    if name == header::TRANSFER_ENCODING
                        || name == header::CONTENT_LENGTH
                        || name == header::CONNECTION
                    {
                        continue;
                    }
                    builder = builder.header(name, value);
                }
                builder
                    .body(Body::from_stream(response.bytes_stream()))
                    .unwrap_or_else(|e| {
                        error!("failed to build forwarded response: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    })
            }
            Err(e) => {
                self.stats
                    .record_request(kind, target, start.elapsed(), false);
                warn!(kind = kind.as_str(), broker = %target, "forward error: {}", e);
                (StatusCode::BAD_GATEWAY, "broker unavailable").into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProduceParams {
    topic: String,
    partition: u32,
}

async fn produce(
    State(proxy): State<Arc<Proxy>>,
    Query(params): Query<ProduceParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = match proxy.broker_for_partition(&params.topic, params.partition) {
        Some(target) => target,
        None => return no_healthy_brokers(),
    };
    let url = format!(
        "{}/produce?topic={}&partition={}",
        target, params.topic, params.partition
    );
    proxy
        .forward(
            RequestKind::Produce,
            &target,
            url,
            Method::POST,
            headers,
            Some(body),
        )
        .await
}

#[derive(Debug, Deserialize)]
struct ConsumeParams {
    topic: String,
    partition: u32,
    group: String,
}

async fn consume(
    State(proxy): State<Arc<Proxy>>,
    Query(params): Query<ConsumeParams>,
    headers: HeaderMap,
) -> Response {
    let target = match proxy.broker_for_partition(&params.topic, params.partition) {
        Some(target) => target,
        None => return no_healthy_brokers(),
    };
    let url = format!(
        "{}/consume?topic={}&partition={}&group={}",
        target, params.topic, params.partition, params.group
    );
    proxy
        .forward(RequestKind::Consume, &target, url, Method::GET, headers, None)
        .await
}

#[derive(Debug, Deserialize)]
struct AckParams {
    topic: String,
    partition: u32,
    group: String,
}

async fn ack(
    State(proxy): State<Arc<Proxy>>,
    Query(params): Query<AckParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = match proxy.broker_for_partition(&params.topic, params.partition) {
        Some(target) => target,
        None => return no_healthy_brokers(),
    };
    let url = format!(
        "{}/ack?topic={}&partition={}&group={}",
        target, params.topic, params.partition, params.group
    );
    proxy
        .forward(
            RequestKind::Ack,
            &target,
            url,
            Method::POST,
            headers,
            Some(body),
        )
        .await
}

/// `/topics` is broker-agnostic; any healthy broker can answer.
async fn topics(State(proxy): State<Arc<Proxy>>, headers: HeaderMap) -> Response {
    let target = match proxy.health().any_healthy() {
        Some(target) => target,
        None => return no_healthy_brokers(),
    };
    let url = format!("{}/topics", target);
    proxy
        .forward(RequestKind::Topics, &target, url, Method::GET, headers, None)
        .await
}

async fn health(State(proxy): State<Arc<Proxy>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "brokers_total": proxy.health().endpoint_count(),
        "brokers_healthy": proxy.health().healthy_count(),
        "timestamp": chrono::Utc::now(),
    }))
}

async fn status(State(proxy): State<Arc<Proxy>>) -> impl IntoResponse {
    let ring = proxy.ring();
    Json(serde_json::json!({
        "broker_status": proxy.health().snapshot(),
        "partition_distribution": ring.partition_distribution(proxy.config.max_partitions),
        "virtual_nodes": ring.virtual_nodes(),
        "max_partitions": proxy.config.max_partitions,
        "timestamp": chrono::Utc::now(),
    }))
}

async fn stats(State(proxy): State<Arc<Proxy>>) -> impl IntoResponse {
    Json(proxy.stats().snapshot(
        proxy.health().healthy_count(),
        proxy.health().endpoint_count(),
    ))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!("failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn no_healthy_brokers() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "no healthy brokers available",
    )
        .into_response()
}
