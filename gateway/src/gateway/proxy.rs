//! Plain HTTP forwarding to a backend.
//!
//! Used for monitoring and other ungated calls, and for gated calls that do
//! not stream. The backend response body is relayed chunk by chunk.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};

use super::gate::ExecutionLease;
use super::router::UpstreamTarget;
use crate::error::{GatewayError, Result};

/// Client headers never forwarded to a backend.
fn is_skipped_request_header(name: &HeaderName) -> bool {
    *name == HOST || *name == CONNECTION || *name == CONTENT_LENGTH
}

/// Backend headers dropped because the body is re-framed.
fn is_skipped_response_header(name: &HeaderName) -> bool {
    *name == TRANSFER_ENCODING || *name == CONTENT_LENGTH || *name == CONNECTION
}

/// Build the backend request for a client call.
///
/// Client headers are carried over, `Authorization` is replaced when the
/// gateway has a key, and a body without a content type is sent as JSON.
pub fn upstream_request(
    client: &Client,
    method: Method,
    target: &UpstreamTarget,
    headers: &HeaderMap,
    body: Bytes,
    api_key: Option<&str>,
) -> RequestBuilder {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_skipped_request_header(name) {
            forwarded.append(name.clone(), value.clone());
        }
    }

    if let Some(key) = api_key {
        match HeaderValue::from_str(&format!("Bearer {}", key)) {
            Ok(value) => {
                forwarded.insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("API key contains invalid header characters, not forwarding it"),
        }
    }

    let mut request = client.request(method, target.url());
    if !body.is_empty() {
        if !forwarded.contains_key(CONTENT_TYPE) {
            forwarded.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        request = request.body(body);
    }
    request.headers(forwarded)
}

/// Send a backend request with the given timeout tier.
///
/// Non-2xx backend answers are turned into [`GatewayError::UpstreamHttp`] carrying the
/// original status and body.
pub async fn send(request: RequestBuilder, timeout: Duration) -> Result<reqwest::Response> {
    let response = request.timeout(timeout).send().await.map_err(GatewayError::from_upstream)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        tracing::debug!(status = %status, "Backend returned error");
        return Err(GatewayError::UpstreamHttp { status, body });
    }
    Ok(response)
}

/// Relay a backend response to the client.
///
/// When a lease is given it rides along with the body stream, so the model's
/// execution slot stays held until the body is fully delivered or dropped.
pub fn relay_response(response: reqwest::Response, lease: Option<ExecutionLease>) -> Response {
    let status = response.status();
    let mut headers = HeaderMap::with_capacity(response.headers().len());
    for (name, value) in response.headers() {
        if !is_skipped_response_header(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let stream = response.bytes_stream().map(move |chunk| {
        let _held = &lease;
        if let Err(ref e) = chunk {
            tracing::warn!("Backend body stream failed: {}", e);
        }
        chunk
    });

    let mut out = Response::new(Body::from_stream(stream));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// Forward a call end to end.
pub async fn forward(
    client: &Client,
    method: Method,
    target: &UpstreamTarget,
    headers: &HeaderMap,
    body: Bytes,
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<Response> {
    let request = upstream_request(client, method, target, headers, body, api_key);
    let response = send(request, timeout).await?;
    Ok(relay_response(response, None))
}
