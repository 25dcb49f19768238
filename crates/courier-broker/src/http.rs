//! HTTP front end: `/produce`, `/consume` (SSE), `/ack`, `/topics`,
//! `/health`.
//!
//! The SSE framing is hand-rolled over a streaming body because each event
//! carries an advisory `partition:` field in addition to `id:` and `data:`.
//! Events are flushed one at a time; the stream channel has capacity 1 so the
//! handler never runs more than one message ahead of `fetch_and_track`.

use crate::broker::Broker;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use courier_common::{Error, Message};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Shared state for the broker router.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

/// Build the broker's router.
pub fn router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/produce", post(produce))
        .route("/consume", get(consume))
        .route("/ack", post(ack))
        .route("/topics", get(topics))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { broker })
}

/// HTTP-facing error wrapper mapping error kinds to status codes.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidInput(_) | Error::NotFound(_) | Error::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::PartitionClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ProduceParams {
    topic: String,
    partition: u32,
}

#[derive(Debug, Serialize)]
struct ProduceResponse {
    id: String,
}

/// `POST /produce?topic=foo&partition=0`, body: raw payload or
/// `{"payload": "..."}`. The message is on the partition log before the
/// response is sent.
async fn produce(
    State(state): State<AppState>,
    Query(params): Query<ProduceParams>,
    body: Bytes,
) -> Result<Json<ProduceResponse>, ApiError> {
    debug!(topic = %params.topic, partition = params.partition, "produce request");
    let payload = decode_payload(&body);
    let partition = state
        .broker
        .partition(&params.topic, params.partition, true)
        .await?;
    let message = Message::new(&params.topic, params.partition, payload);
    let id = message.id.clone();
    partition.enqueue(message).await?;
    Ok(Json(ProduceResponse { id }))
}

/// Accept either the raw body text or a JSON object with a non-empty
/// `payload` field.
fn decode_payload(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body).trim().to_string();
    if text.starts_with('{') {
        #[derive(Deserialize)]
        struct Wrapper {
            payload: Option<String>,
        }
        if let Ok(wrapper) = serde_json::from_str::<Wrapper>(&text) {
            if let Some(payload) = wrapper.payload {
                if !payload.is_empty() {
                    return payload;
                }
            }
        }
    }
    text
}

#[derive(Debug, Deserialize)]
struct ConsumeParams {
    topic: String,
    partition: u32,
    group: String,
}

/// `GET /consume?topic=foo&partition=0&group=g1` — long-lived SSE stream.
/// Consuming from a partition that has never been produced to fails before
/// any stream bytes are written.
async fn consume(
    State(state): State<AppState>,
    Query(params): Query<ConsumeParams>,
) -> Result<Response, ApiError> {
    debug!(
        topic = %params.topic,
        partition = params.partition,
        group = %params.group,
        "consume stream opened"
    );
    let partition = state
        .broker
        .partition(&params.topic, params.partition, false)
        .await?;

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(1);
    let group = params.group;
    tokio::spawn(async move {
        loop {
            if tx.is_closed() {
                // client went away; anything pending redelivers by timeout
                break;
            }
            match partition.fetch_and_track(&group).await {
                Ok(Some(message)) => {
                    let frame = match sse_frame(&message) {
                        Some(frame) => frame,
                        None => continue,
                    };
                    if tx.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => continue,
                Err(_) => break,
            }
        }
    });

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(response)
}

/// One SSE event: `id:`, `data:` (the message JSON), an advisory
/// `partition:` line, then a blank line.
fn sse_frame(message: &Message) -> Option<Bytes> {
    let data = match serde_json::to_string(message) {
        Ok(data) => data,
        Err(e) => {
            error!(id = %message.id, "failed to encode message: {}", e);
            return None;
        }
    };
    Some(Bytes::from(format!(
        "id: {}\ndata: {}\npartition: {}\n\n",
        message.id, data, message.partition
    )))
}

#[derive(Debug, Deserialize)]
struct AckParams {
    topic: String,
    partition: u32,
    group: String,
}

#[derive(Debug, Deserialize)]
struct AckRequest {
    id: String,
}

/// `POST /ack?topic=foo&partition=0&group=g1`, body `{"id": "..."}`.
async fn ack(
    State(state): State<AppState>,
    Query(params): Query<AckParams>,
    Json(request): Json<AckRequest>,
) -> Result<Response, ApiError> {
    if request.id.is_empty() {
        return Err(Error::InvalidInput("bad body".to_string()).into());
    }
    let partition = state
        .broker
        .partition(&params.topic, params.partition, false)
        .await?;
    if partition.ack(&request.id, &params.group) {
        Ok((StatusCode::OK, "ok").into_response())
    } else {
        warn!(
            topic = %params.topic,
            partition = params.partition,
            group = %params.group,
            id = %request.id,
            "ack rejected"
        );
        Ok((
            StatusCode::BAD_REQUEST,
            "ack failed (unknown id or wrong group)",
        )
            .into_response())
    }
}

/// `GET /topics` — partition indices created on this broker, per topic.
async fn topics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.broker.owned_partitions().await)
}

/// `GET /health` — liveness blob.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "owned_partitions": state.broker.partition_count().await,
        "uptime_seconds": state.broker.uptime_seconds(),
        "timestamp": chrono::Utc::now(),
    }))
}
