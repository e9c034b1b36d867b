//! Streaming relay with keepalive.
//!
//! A streaming inference call gets its `200 text/event-stream` head as soon as
//! it is admitted. From then on two tasks cooperate:
//!
//! ```text
//!  backend ──► worker ──[BackendEvent]──► relay ──[frames]──► client
//!                ▲                          │
//!                └──── cancellation ────────┘
//! ```
//!
//! The relay first waits for the model's execution slot, then for backend
//! events. Whenever a wait exceeds the keepalive interval it writes an SSE
//! comment frame so proxies and clients do not drop the idle connection. A
//! closed client cancels the worker and releases the slot.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::RequestBuilder;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::gate::{ExecutionLease, QueueTicket};
use crate::error::GatewayError;

/// SSE comment frame sent while nothing else is available.
pub const KEEPALIVE_FRAME: &[u8] = b": keepalive\n\n";

/// Terminal marker of an OpenAI-style event stream.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

const CHANNEL_CAPACITY: usize = 32;

type Frame = Result<Bytes, Infallible>;

/// What the backend worker reports to the relay.
#[derive(Debug)]
pub enum BackendEvent {
    /// A body chunk, forwarded verbatim.
    Data(Bytes),
    /// The backend finished its stream.
    Completed,
    /// The backend answered with a non-2xx status.
    HttpError { status: StatusCode, body: Bytes },
    /// The connection to the backend failed.
    TransportError(String),
}

/// A streaming call that has been admitted to its model's queue.
pub struct StreamJob {
    pub ticket: QueueTicket,
    pub request: RequestBuilder,
    pub keepalive: Duration,
}

/// Start relaying `job` and return the client response immediately.
pub fn start(job: StreamJob) -> Response {
    let (client_tx, client_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
    tokio::spawn(relay(job, client_tx));
    event_stream_response(Body::from_stream(ReceiverStream::new(client_rx)))
}

fn event_stream_response(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// Single `data:` event describing a failure, in the gateway's error shape.
pub fn error_event(err: &GatewayError) -> Bytes {
    let payload = json!({
        "error": {
            "message": err.message(),
            "type": err.error_type(),
        }
    });
    Bytes::from(format!("data: {}\n\n", payload))
}

async fn write(client: &mpsc::Sender<Frame>, frame: Bytes) -> bool {
    client.send(Ok(frame)).await.is_ok()
}

async fn relay(job: StreamJob, client: mpsc::Sender<Frame>) {
    let StreamJob {
        ticket,
        request,
        keepalive,
    } = job;
    let model_key = ticket.gate().model_key().to_string();

    let Some(lease) = wait_for_slot(ticket, keepalive, &client).await else {
        tracing::debug!(model_key = %model_key, "Client disconnected while queued");
        return;
    };

    let cancel = CancellationToken::new();
    let (events_tx, mut events) = mpsc::channel(CHANNEL_CAPACITY);
    let worker = tokio::spawn(backend_worker(request, events_tx, cancel.clone()));

    let mut tail = DoneMarker::default();
    loop {
        let next = tokio::select! {
            next = tokio::time::timeout(keepalive, events.recv()) => next,
            _ = client.closed() => {
                tracing::debug!(model_key = %model_key, "Client disconnected during stream");
                break;
            }
        };

        let delivered = match next {
            Err(_) => write(&client, Bytes::from_static(KEEPALIVE_FRAME)).await,
            Ok(Some(BackendEvent::Data(chunk))) => {
                tail.observe(&chunk);
                if write(&client, chunk).await {
                    continue;
                }
                false
            }
            Ok(Some(BackendEvent::Completed)) => {
                if !tail.seen() {
                    write(&client, Bytes::from_static(DONE_FRAME)).await;
                }
                break;
            }
            Ok(Some(BackendEvent::HttpError { status, body })) => {
                tracing::warn!(model_key = %model_key, status = %status, "Backend rejected streaming call");
                finish_with_error(&client, &GatewayError::UpstreamHttp { status, body }).await;
                break;
            }
            Ok(Some(BackendEvent::TransportError(message))) => {
                tracing::warn!(model_key = %model_key, "Backend stream failed: {}", message);
                finish_with_error(&client, &GatewayError::Transport(message)).await;
                break;
            }
            Ok(None) => {
                finish_with_error(&client, &GatewayError::Internal("backend worker stopped".to_string()))
                    .await;
                break;
            }
        };

        if !delivered {
            tracing::debug!(model_key = %model_key, "Client write failed, aborting stream");
            break;
        }
    }

    // The slot must outlive the backend call.
    cancel.cancel();
    let _ = worker.await;
    drop(lease);
}

async fn finish_with_error(client: &mpsc::Sender<Frame>, err: &GatewayError) {
    if write(client, error_event(err)).await {
        write(client, Bytes::from_static(DONE_FRAME)).await;
    }
}

/// Take the slot inline if free; otherwise wait, emitting one keepalive per
/// elapsed interval. No deadline: only a closed client ends the wait early.
async fn wait_for_slot(
    ticket: QueueTicket,
    keepalive: Duration,
    client: &mpsc::Sender<Frame>,
) -> Option<ExecutionLease> {
    let gate = ticket.gate().clone();
    if let Some(permit) = gate.try_acquire() {
        return Some(ExecutionLease::new(ticket, permit));
    }

    tracing::debug!(
        model_key = %gate.model_key(),
        depth = gate.depth(),
        "Streaming call queued behind running inference"
    );
    let acquire = gate.acquire();
    tokio::pin!(acquire);
    loop {
        tokio::select! {
            permit = &mut acquire => {
                return match permit {
                    Ok(permit) => Some(ExecutionLease::new(ticket, permit)),
                    Err(e) => {
                        finish_with_error(client, &e).await;
                        None
                    }
                };
            }
            _ = tokio::time::sleep(keepalive) => {
                if !write(client, Bytes::from_static(KEEPALIVE_FRAME)).await {
                    return None;
                }
            }
            _ = client.closed() => return None,
        }
    }
}

async fn backend_worker(
    request: RequestBuilder,
    events: mpsc::Sender<BackendEvent>,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => tracing::debug!("Backend call cancelled"),
        _ = pump(request, &events) => {}
    }
}

async fn pump(request: RequestBuilder, events: &mpsc::Sender<BackendEvent>) {
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            let _ = events.send(BackendEvent::TransportError(e.to_string())).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        let _ = events.send(BackendEvent::HttpError { status, body }).await;
        return;
    }

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                if events.send(BackendEvent::Data(chunk)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = events.send(BackendEvent::TransportError(e.to_string())).await;
                return;
            }
        }
    }
    let _ = events.send(BackendEvent::Completed).await;
}

/// Tracks whether the forwarded bytes already end with the done marker,
/// across chunk boundaries.
#[derive(Debug, Default)]
struct DoneMarker {
    tail: Vec<u8>,
}

impl DoneMarker {
    const MARKER: &'static [u8] = b"data: [DONE]";

    fn observe(&mut self, chunk: &[u8]) {
        self.tail.extend_from_slice(chunk);
        let keep = Self::MARKER.len() + 8;
        if self.tail.len() > keep {
            self.tail.drain(..self.tail.len() - keep);
        }
    }

    fn seen(&self) -> bool {
        let trimmed = trim_ascii_end(&self.tail);
        trimmed.ends_with(Self::MARKER)
    }
}

fn trim_ascii_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}
