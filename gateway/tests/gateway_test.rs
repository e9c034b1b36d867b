use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use futures_util::StreamExt;
use http::{Request, StatusCode};
use model_gateway::gateway::relay::{DONE_FRAME, KEEPALIVE_FRAME};
use model_gateway::test_util::{create_test_state, test_config, StaticDiscovery};
use model_gateway::{app, AppState, BackendRecord, Config};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(name: &str, server: &MockServer) -> BackendRecord {
    BackendRecord::new(name, std::process::id() as i32, server.address().port())
}

fn build(config: Config, records: Vec<BackendRecord>, api_key: Option<&str>) -> (Router, Arc<AppState>) {
    let discovery = Arc::new(StaticDiscovery::new(records));
    let state = Arc::new(create_test_state(config, discovery, api_key));
    (app(state.clone()), state)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn wait_for_depth(state: &AppState, key: &str, expected: usize) {
    for _ in 0..100 {
        if state.gates.depth(key) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("queue depth of {} never reached {}", key, expected);
}

async fn mount_completion(server: &MockServer, reply: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "reply": reply })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_health_is_served_locally() {
    let (app, _) = build(test_config(), vec![], None);
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_key_is_rejected_before_proxying() {
    let server = MockServer::start().await;
    Mock::given(path("/slots"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let (app, _) = build(test_config(), vec![record("m1", &server)], Some("sk-test"));

    let response = app.clone().oneshot(get("/api/slots")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"]["type"], "unauthorized");

    let wrong = Request::builder()
        .uri("/health")
        .header("authorization", "Bearer sk-wrong")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(wrong).await.unwrap().status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_key_is_forwarded_to_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slots"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 0}])))
        .expect(1)
        .mount(&server)
        .await;
    let (app, _) = build(test_config(), vec![record("m1", &server)], Some("sk-test"));

    let request = Request::builder()
        .uri("/api/slots")
        .header("authorization", "Bearer sk-test")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_api_prefix_is_stripped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/foo"))
        .respond_with(ResponseTemplate::new(200).set_body_string("from m2"))
        .expect(1)
        .mount(&server)
        .await;
    let other = MockServer::start().await;
    let (app, _) = build(
        test_config(),
        vec![record("m1", &other), record("m2", &server)],
        None,
    );

    let response = app.oneshot(get("/api/m2/v1/foo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "from m2");
}

#[tokio::test]
async fn test_model_alias_and_fallback_routing() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    mount_completion(&first, "first").await;
    mount_completion(&second, "second").await;
    let (app, _) = build(
        test_config(),
        vec![
            record("m1", &first),
            record("m2", &second).with_alias("alias-y"),
        ],
        None,
    );

    let cases = [
        (json!({"model": "alias-y"}), "second"),
        (json!({"model": "m2"}), "second"),
        (json!({"model": "m1"}), "first"),
        (json!({"model": "unknown"}), "first"),
        (json!({"messages": []}), "first"),
    ];
    for (body, expected) in cases {
        let response = app
            .clone()
            .oneshot(post_json("/v1/chat/completions", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "body {}", body);
        let reply: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(reply["reply"], expected, "body {}", body);
    }
}

#[tokio::test]
async fn test_completion_without_backends_is_unavailable() {
    let (app, _) = build(test_config(), vec![], None);
    let response = app
        .oneshot(post_json("/v1/chat/completions", json!({"model": "m1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"]["type"], "no_backend");
}

#[tokio::test]
async fn test_listings_are_stable() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    let (app, _) = build(
        test_config(),
        vec![
            record("m2", &second),
            record("m1", &first).with_alias("alias-x"),
        ],
        None,
    );

    let api_a = body_text(app.clone().oneshot(get("/api/models")).await.unwrap()).await;
    let api_b = body_text(app.clone().oneshot(get("/api/models")).await.unwrap()).await;
    assert_eq!(api_a, api_b);
    let listed: Value = serde_json::from_str(&api_a).unwrap();
    assert_eq!(listed[0]["name"], "m1");
    assert_eq!(listed[0]["modelAlias"], "alias-x");
    assert_eq!(listed[0]["queueDepth"], 0);
    assert_eq!(listed[1]["name"], "m2");

    let v1_a = body_text(app.clone().oneshot(get("/v1/models")).await.unwrap()).await;
    let v1_b = body_text(app.clone().oneshot(get("/v1/models")).await.unwrap()).await;
    assert_eq!(v1_a, v1_b);
    let models: Value = serde_json::from_str(&v1_a).unwrap();
    let ids: Vec<_> = models["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["alias-x", "m1", "m2"]);
    assert_eq!(models["data"][0]["owned_by"], "local");
}

#[tokio::test]
async fn test_queue_full_is_rejected_per_model() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    mount_completion(&first, "first").await;
    mount_completion(&second, "second").await;
    let mut config = test_config();
    config.gate.max_queue_depth = 1;
    let (app, state) = build(
        config,
        vec![record("m1", &first), record("m2", &second)],
        None,
    );

    let _held = state.gates.gate("m1").enter_queue().unwrap();

    let response = app
        .clone()
        .oneshot(post_json("/v1/chat/completions", json!({"model": "m1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"]["type"], "queue_full");
    assert_eq!(state.gates.depth("m1"), 1);

    let response = app
        .oneshot(post_json("/v1/chat/completions", json!({"model": "m2"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sequential_calls_all_succeed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(3)
        .mount(&server)
        .await;
    let (app, state) = build(test_config(), vec![record("m1", &server)], None);

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(post_json("/v1/chat/completions", json!({"model": "m1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_text(response).await;
    }
    wait_for_depth(&state, "m1", 0).await;
}

#[tokio::test]
async fn test_queued_non_stream_call_times_out() {
    let server = MockServer::start().await;
    mount_completion(&server, "late").await;
    let mut config = test_config();
    config.timeouts.long_call_secs = 1;
    let (app, state) = build(config, vec![record("m1", &server)], None);

    let running = state.gates.gate("m1").try_acquire().unwrap();
    let response = app
        .oneshot(post_json("/v1/chat/completions", json!({"model": "m1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"]["type"], "upstream_timeout");
    assert_eq!(state.gates.depth("m1"), 0);
    drop(running);
}

#[tokio::test]
async fn test_backend_error_is_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(400).set_body_raw(r#"{"error":"context too long"}"#, "application/json"),
        )
        .mount(&server)
        .await;
    let (app, state) = build(test_config(), vec![record("m1", &server)], None);

    let response = app
        .oneshot(post_json("/v1/chat/completions", json!({"model": "m1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, r#"{"error":"context too long"}"#);
    wait_for_depth(&state, "m1", 0).await;
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let (app, _) = build(
        test_config(),
        vec![BackendRecord::new("m1", std::process::id() as i32, port)],
        None,
    );

    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"]["type"], "bad_gateway");
}

#[tokio::test]
async fn test_stream_sends_keepalive_while_queued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("\"stream\":true"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("data: {\"content\":\"hi\"}\n\n", "text/event-stream"),
        )
        .mount(&server)
        .await;
    let (app, state) = build(test_config(), vec![record("m1", &server)], None);

    let running = state.gates.gate("m1").try_acquire().unwrap();
    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({"model": "m1", "stream": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let mut frames = response.into_body().into_data_stream();
    let first = frames.next().await.unwrap().unwrap();
    assert_eq!(&first[..], KEEPALIVE_FRAME);

    drop(running);
    let mut rest = Vec::new();
    while let Some(frame) = frames.next().await {
        rest.extend_from_slice(&frame.unwrap());
    }
    let rest = String::from_utf8(rest).unwrap();
    assert!(rest.contains("data: {\"content\":\"hi\"}\n\n"));
    assert!(rest.ends_with(std::str::from_utf8(DONE_FRAME).unwrap()));
    wait_for_depth(&state, "m1", 0).await;
}

#[tokio::test]
async fn test_stream_does_not_repeat_done_marker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"content\":\"a\"}\n\ndata: [DONE]\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;
    let (app, _) = build(test_config(), vec![record("m1", &server)], None);

    let response = app
        .oneshot(post_json("/api/m1/completion", json!({"stream": true})))
        .await
        .unwrap();
    let text = body_text(response).await;
    assert_eq!(text.matches("[DONE]").count(), 1);
    assert!(text.contains("data: {\"content\":\"a\"}\n\n"));
}

#[tokio::test]
async fn test_stream_backend_error_becomes_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("slot crashed"))
        .mount(&server)
        .await;
    let (app, state) = build(test_config(), vec![record("m1", &server)], None);

    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({"model": "m1", "stream": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let text = body_text(response).await;
    let event = text
        .split("\n\n")
        .find(|frame| frame.starts_with("data: {"))
        .unwrap();
    let payload: Value = serde_json::from_str(event.trim_start_matches("data: ")).unwrap();
    assert_eq!(payload["error"]["type"], "upstream_error");
    assert_eq!(payload["error"]["message"], "slot crashed");
    assert!(text.ends_with("data: [DONE]\n\n"));
    wait_for_depth(&state, "m1", 0).await;
}

#[tokio::test]
async fn test_stream_client_disconnect_releases_queue() {
    let server = MockServer::start().await;
    mount_completion(&server, "unused").await;
    let (app, state) = build(test_config(), vec![record("m1", &server)], None);

    let running = state.gates.gate("m1").try_acquire().unwrap();
    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({"model": "m1", "stream": true}),
        ))
        .await
        .unwrap();
    assert_eq!(state.gates.depth("m1"), 1);

    drop(response);
    wait_for_depth(&state, "m1", 0).await;
    drop(running);
    assert!(state.gates.gate("m1").try_acquire().is_some());
}

#[tokio::test]
async fn test_monitor_calls_are_not_gated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    let (app, state) = build(test_config(), vec![record("m1", &server)], None);

    let _running = state.gates.gate("m1").try_acquire().unwrap();
    let response = app.oneshot(get("/api/m1/slots")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.gates.depth("m1"), 0);
}

#[tokio::test]
async fn test_empty_api_path_reaches_default_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("root"))
        .expect(1)
        .mount(&server)
        .await;
    let (app, _) = build(test_config(), vec![record("m1", &server)], None);

    let response = app.oneshot(get("/api/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "root");
}

#[tokio::test]
async fn test_stream_sends_keepalive_while_backend_is_silent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("data: {\"c\":1}\n\n", "text/event-stream")
                .set_delay(Duration::from_millis(2500)),
        )
        .mount(&server)
        .await;
    let (app, state) = build(test_config(), vec![record("m1", &server)], None);

    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({"model": "m1", "stream": true}),
        ))
        .await
        .unwrap();
    let text = body_text(response).await;

    assert!(text.starts_with(std::str::from_utf8(KEEPALIVE_FRAME).unwrap()));
    let data_at = text.find("data: {\"c\":1}\n\n").unwrap();
    assert!(text[..data_at].matches(": keepalive\n\n").count() >= 2);
    assert!(text.ends_with("data: [DONE]\n\n"));
    wait_for_depth(&state, "m1", 0).await;
}

#[tokio::test]
async fn test_stream_disconnect_cancels_backend_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("data: {\"c\":1}\n\n", "text/event-stream")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    let (app, state) = build(test_config(), vec![record("m1", &server)], None);

    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({"model": "m1", "stream": true}),
        ))
        .await
        .unwrap();

    // First keepalive proves the backend call is in flight.
    let mut frames = response.into_body().into_data_stream();
    let first = frames.next().await.unwrap().unwrap();
    assert_eq!(&first[..], KEEPALIVE_FRAME);
    assert!(state.gates.gate("m1").try_acquire().is_none());

    drop(frames);
    wait_for_depth(&state, "m1", 0).await;
    assert!(state.gates.gate("m1").try_acquire().is_some());
}

#[tokio::test]
async fn test_slow_monitor_call_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slots"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let mut config = test_config();
    config.timeouts.monitor_secs = 1;
    let (app, _) = build(config, vec![record("m1", &server)], None);

    let started = std::time::Instant::now();
    let response = app.oneshot(get("/api/m1/slots")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(4));
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"]["type"], "upstream_timeout");
}
