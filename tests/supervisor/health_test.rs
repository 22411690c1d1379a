//! Integration tests for the HTTP health probe and poller.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use seq_llm::supervisor::{HealthPoller, HealthProbe, HttpHealthProbe};

use crate::chat::spawn_server;

fn port_of(base_url: &str) -> u16 {
    base_url.rsplit(':').next().unwrap().parse().unwrap()
}

#[tokio::test]
async fn http_probe_ready_only_on_200() {
    let ok = spawn_server(Router::new().route("/health", get(|| async { "ok" }))).await;
    let loading = spawn_server(Router::new().route(
        "/health",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "Loading model") }),
    ))
    .await;
    let probe = HttpHealthProbe::new().unwrap();

    assert!(probe.is_ready(port_of(&ok)).await);
    assert!(!probe.is_ready(port_of(&loading)).await);
}

#[tokio::test]
async fn http_probe_unreachable_is_not_ready() {
    let port = super::free_port();
    let probe = HttpHealthProbe::new().unwrap();
    assert!(!probe.is_ready(port).await);
}

#[tokio::test]
async fn poller_waits_for_model_to_load() {
    // 503 for the first two requests, then 200.
    let hits = Arc::new(AtomicU32::new(0));
    let app = Router::new()
        .route(
            "/health",
            get(|State(hits): State<Arc<AtomicU32>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                }
            }),
        )
        .with_state(hits.clone());
    let port = port_of(&spawn_server(app).await);
    let probe = HttpHealthProbe::new().unwrap();

    let result = HealthPoller::new(&probe, Duration::from_secs(10), Duration::from_millis(20))
        .wait_until_ready(port)
        .await;

    assert!(result.ready);
    assert_eq!(result.attempts, 3);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}
