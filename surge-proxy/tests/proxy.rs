//! End-to-end tests: proxy router in front of fake axum backends.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    Json, Router,
};
use serde_json::{json, Value};
use surge_proxy::metrics::prometheus::ADMISSIONS_TOTAL;
use surge_proxy::{build_router, AppState, ProxyConfig};

#[derive(Default)]
struct BackendLog {
    calls: Mutex<Vec<Value>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl BackendLog {
    fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct FakeBackend {
    name: &'static str,
    log: Arc<BackendLog>,
}

/// Echo the request back; `delayMs` and `status` in the body shape the reply
async fn echo(
    State(fake): State<FakeBackend>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    fake.log.calls.lock().unwrap().push(body.clone());

    let now = fake.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    fake.log.peak.fetch_max(now, Ordering::SeqCst);
    if let Some(ms) = body.get("delayMs").and_then(Value::as_u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
    fake.log.in_flight.fetch_sub(1, Ordering::SeqCst);

    let status = body
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| StatusCode::from_u16(s as u16).ok())
        .unwrap_or(StatusCode::OK);
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    (
        status,
        Json(json!({
            "backend": fake.name,
            "method": method.as_str(),
            "path": uri.to_string(),
            "request_id": header("x-request-id"),
            "content_type": header("content-type"),
            "body": body,
        })),
    )
}

async fn start_backend(name: &'static str) -> (SocketAddr, Arc<BackendLog>) {
    let log = Arc::new(BackendLog::default());
    let app = Router::new()
        .fallback(echo)
        .with_state(FakeBackend { name, log: Arc::clone(&log) });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, log)
}

/// An address nothing listens on
async fn dead_address() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn config(backends: &[SocketAddr]) -> ProxyConfig {
    ProxyConfig {
        destination_servers: backends.iter().map(|a| a.to_string()).collect(),
        debounce_ms: 5,
        request_timeout_secs: 5,
        ..Default::default()
    }
}

async fn start_proxy(config: ProxyConfig) -> (String, Arc<AppState>) {
    let state = Arc::new(AppState::new(config).unwrap());
    let app = build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let response = client.post(url).json(&body).send().await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_forwards_request_and_relays_response() {
    let (backend, log) = start_backend("a").await;
    let (proxy, _) = start_proxy(config(&[backend])).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/v1/run?mode=fast", proxy))
        .header("x-request-id", "req-7")
        .json(&json!({"hello": "world"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["backend"], "a");
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/v1/run?mode=fast");
    assert_eq!(body["request_id"], "req-7");
    assert_eq!(body["body"]["hello"], "world");
    assert_eq!(log.calls().len(), 1);
}

#[tokio::test]
async fn test_request_without_body_is_forwarded() {
    let (backend, _) = start_backend("a").await;
    let (proxy, _) = start_proxy(config(&[backend])).await;

    let response = reqwest::get(format!("{}/status", proxy)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["method"], "GET");
    assert_eq!(body["body"], Value::Null);
}

#[tokio::test]
async fn test_backend_status_passed_through() {
    let (backend, _) = start_backend("a").await;
    let (proxy, _) = start_proxy(config(&[backend])).await;

    let client = reqwest::Client::new();
    let (status, body) = post(&client, format!("{}/x", proxy), json!({"status": 404})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["backend"], "a");
}

#[tokio::test]
async fn test_invalid_json_rejected() {
    let (backend, log) = start_backend("a").await;
    let (proxy, _) = start_proxy(config(&[backend])).await;
    let rejected = ADMISSIONS_TOTAL.with_label_values(&["rejected"]);
    let rejected_before = rejected.get();

    let response = reqwest::Client::new()
        .post(format!("{}/x", proxy))
        .body("definitely not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "InvalidRequest");
    assert!(log.calls().is_empty());
    assert!(rejected.get() >= rejected_before + 1.0);
}

#[tokio::test]
async fn test_form_body_forwarded_as_json() {
    let (backend, log) = start_backend("a").await;
    let mut config = config(&[backend]);
    config.priority.enabled = true;
    let (proxy, state) = start_proxy(config).await;

    let response = reqwest::Client::new()
        .post(format!("{}/submit", proxy))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("user=alice&priority=2")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content_type"], "application/json");
    assert_eq!(body["body"], json!({"user": "alice", "priority": "2"}));
    assert_eq!(log.calls(), vec![json!({"user": "alice", "priority": "2"})]);
    assert_eq!(state.scheduler.stats().admissions_rejected, 0);
}

#[tokio::test]
async fn test_missing_priority_rejected() {
    let (backend, log) = start_backend("a").await;
    let mut config = config(&[backend]);
    config.priority.enabled = true;
    let (proxy, state) = start_proxy(config).await;

    let client = reqwest::Client::new();
    let (status, body) = post(&client, format!("{}/x", proxy), json!({"job": 1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "AdmissionRejected");
    assert!(log.calls().is_empty());
    assert_eq!(state.scheduler.stats().admissions_rejected, 1);
}

#[tokio::test]
async fn test_ceiling_enforced_under_burst() {
    let (first, first_log) = start_backend("a").await;
    let (second, second_log) = start_backend("b").await;
    let mut config = config(&[first, second]);
    config.max_requests_per_server = 2;
    config.randomize_ties = true;
    let (proxy, state) = start_proxy(config).await;
    let client = reqwest::Client::new();

    let mut requests = Vec::new();
    for i in 0..12u64 {
        let client = client.clone();
        let url = format!("{}/work", proxy);
        requests.push(tokio::spawn(async move {
            post(&client, url, json!({"delayMs": 20 + i % 3 * 10})).await
        }));
        if i % 4 == 0 {
            tokio::time::sleep(Duration::from_millis(7)).await;
        }
    }
    for result in futures::future::join_all(requests).await {
        let (status, _) = result.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    assert!(first_log.peak.load(Ordering::SeqCst) <= 2);
    assert!(second_log.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(first_log.calls().len() + second_log.calls().len(), 12);

    let stats = state.scheduler.stats();
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.units_dispatched, 12);
}

#[tokio::test]
async fn test_priority_reorders_waiting_requests() {
    let (backend, log) = start_backend("a").await;
    let mut config = config(&[backend]);
    config.priority.enabled = true;
    let (proxy, _) = start_proxy(config).await;
    let client = reqwest::Client::new();

    let blocker = {
        let client = client.clone();
        let url = format!("{}/work", proxy);
        let body = json!({"priority": 0, "delayMs": 300});
        tokio::spawn(async move { post(&client, url, body).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut waiting = Vec::new();
    for priority in [5, 1, 3] {
        let client = client.clone();
        let url = format!("{}/work", proxy);
        let body = json!({"priority": priority});
        waiting.push(tokio::spawn(async move { post(&client, url, body).await }));
    }

    assert_eq!(blocker.await.unwrap().0, StatusCode::OK);
    for request in waiting {
        assert_eq!(request.await.unwrap().0, StatusCode::OK);
    }

    let order: Vec<u64> = log.calls().iter().filter_map(|c| c["priority"].as_u64()).collect();
    assert_eq!(order, vec![0, 1, 3, 5]);
}

#[tokio::test]
async fn test_bundle_runs_in_order_on_one_backend() {
    let (first, first_log) = start_backend("a").await;
    let (second, second_log) = start_backend("b").await;
    let (proxy, state) = start_proxy(config(&[first, second])).await;
    let client = reqwest::Client::new();

    let mut members = Vec::new();
    for order in [2, 0, 1] {
        let client = client.clone();
        let url = format!("{}/part", proxy);
        let body = json!({"bundleId": "job-1", "bundleOrder": order, "bundleSize": 3});
        members.push(tokio::spawn(async move { post(&client, url, body).await }));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut backends = Vec::new();
    for member in members {
        let (status, body) = member.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        backends.push(body["backend"].as_str().unwrap().to_string());
    }
    assert!(backends.iter().all(|b| *b == backends[0]));

    let calls = if backends[0] == "a" { first_log.calls() } else { second_log.calls() };
    let order: Vec<u64> = calls.iter().filter_map(|c| c["bundleOrder"].as_u64()).collect();
    assert_eq!(order, vec![0, 1, 2]);

    let stats = state.scheduler.stats();
    assert_eq!(stats.bundles_completed, 1);
    assert_eq!(stats.units_dispatched, 1);
}

#[tokio::test]
async fn test_transport_failure_releases_slot() {
    let dead = dead_address().await;
    let (proxy, state) = start_proxy(config(&[dead])).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let (status, body) = post(&client, format!("{}/x", proxy), json!({"n": 1})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["type"], "BackendFailure");
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    let stats = state.scheduler.stats();
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.units_dispatched, 2);
}

#[tokio::test]
async fn test_transport_failure_does_not_disturb_concurrent_dispatch() {
    let (live, live_log) = start_backend("a").await;
    let dead = dead_address().await;
    let (proxy, state) = start_proxy(config(&[live, dead])).await;
    let client = reqwest::Client::new();

    let slow = {
        let client = client.clone();
        let url = format!("{}/slow", proxy);
        tokio::spawn(async move { post(&client, url, json!({"delayMs": 300})).await })
    };
    for _ in 0..100 {
        if live_log.in_flight.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(live_log.in_flight.load(Ordering::SeqCst), 1);

    // The live backend is full, so this one goes to the dead backend in a second pass
    let (status, body) = post(&client, format!("{}/fail", proxy), json!({"n": 1})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["type"], "BackendFailure");
    assert!(!slow.is_finished());

    let (status, body) = slow.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend"], "a");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let stats = state.scheduler.stats();
    assert!(stats.passes_started >= 2);
    assert!(stats.backends.iter().all(|b| b.active == 0));
    assert_eq!(stats.units_dispatched, 2);
    assert_eq!(live_log.calls().len(), 1);
}

#[tokio::test]
async fn test_reset_bundle_member_gets_service_unavailable() {
    let (backend, log) = start_backend("a").await;
    let (proxy, state) = start_proxy(config(&[backend])).await;

    let member = {
        let url = format!("{}/part", proxy);
        tokio::spawn(async move {
            post(&reqwest::Client::new(), url, json!({"bundleId": "b", "bundleSize": 2})).await
        })
    };

    for _ in 0..100 {
        if state.scheduler.stats().pending_bundles == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.scheduler.reset_bundles(), 1);

    let (status, body) = member.await.unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["type"], "Dropped");
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    surge_proxy::init_metrics();
    let (backend, log) = start_backend("a").await;
    let (proxy, _) = start_proxy(config(&[backend])).await;

    let health: Value =
        reqwest::get(format!("{}/health", proxy)).await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["backends"], 1);

    let live = reqwest::get(format!("{}/live", proxy)).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let metrics: Value =
        reqwest::get(format!("{}/metrics", proxy)).await.unwrap().json().await.unwrap();
    assert_eq!(metrics["scheduler"]["config"]["max_requests_per_backend"], 1);
    assert_eq!(metrics["scheduler"]["current"]["queue_depth"], 0);

    let text = reqwest::get(format!("{}/metrics/prometheus", proxy))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("surge_queue_size"));

    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_routes_prefix_frees_backend_paths() {
    let (backend, log) = start_backend("a").await;
    let mut config = config(&[backend]);
    config.routes_prefix = "/_surge".to_string();
    let (proxy, _) = start_proxy(config).await;
    let client = reqwest::Client::new();

    let health: Value =
        reqwest::get(format!("{}/_surge/health", proxy)).await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "healthy");

    let (status, body) = post(&client, format!("{}/metrics", proxy), json!({"n": 1})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/metrics");

    let response = reqwest::get(format!("{}/health", proxy)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["backend"], "a");
    assert_eq!(log.calls().len(), 2);
}
