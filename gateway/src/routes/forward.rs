//! Dispatch of proxied calls: gated inference or plain pass-through.

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use gateway_common::CompletionBody;
use tokio::time::Instant;

use crate::error::Result;
use crate::gateway::relay::{self, StreamJob};
use crate::gateway::{is_gated_path, is_monitor_path, proxy, UpstreamTarget};
use crate::AppState;

/// Forward a call to `target`, gating it when the path is an inference endpoint.
pub async fn dispatch(
    state: &AppState,
    target: UpstreamTarget,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    if is_gated_path(&target.path) {
        return gated(state, target, method, headers, body).await;
    }

    let timeout = if is_monitor_path(&target.path) {
        state.config.monitor_timeout()
    } else {
        state.config.long_call_timeout()
    };
    tracing::debug!(url = %target.url(), timeout_secs = timeout.as_secs(), "Pass-through call");
    proxy::forward(
        &state.http_client,
        method,
        &target,
        &headers,
        body,
        state.api_key.as_deref(),
        timeout,
    )
    .await
}

async fn gated(
    state: &AppState,
    target: UpstreamTarget,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let streaming = CompletionBody::parse(&body).is_streaming();
    let gate = state.gates.gate(&target.model_key);
    let ticket = gate.enter_queue()?;

    tracing::info!(
        model_key = %target.model_key,
        path = %target.path,
        streaming = streaming,
        depth = gate.depth(),
        "Inference call admitted"
    );

    let request = proxy::upstream_request(
        &state.http_client,
        method,
        &target,
        &headers,
        body,
        state.api_key.as_deref(),
    );

    if streaming {
        return Ok(relay::start(StreamJob {
            ticket,
            request,
            keepalive: state.config.keepalive_interval(),
        }));
    }

    // One deadline covers both the queue wait and the backend call.
    let timeout = state.config.long_call_timeout();
    let deadline = Instant::now() + timeout;
    let lease = gate.lease_within(ticket, timeout).await?;
    let remaining = deadline.saturating_duration_since(Instant::now());
    let response = proxy::send(request, remaining).await?;
    Ok(proxy::relay_response(response, Some(lease)))
}
