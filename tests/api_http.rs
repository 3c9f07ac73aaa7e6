// tests/api_http.rs
//
// HTTP-level tests for the trigger API without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use common::{harness, rec, FakeFeed, Harness};
use market_collector::api::{self, AppState};
use market_collector::error::CollectError;
use market_collector::{Shutdown, SourceRunner};

const BODY_LIMIT: usize = 1024 * 1024;

fn daily_price() -> Harness {
    let now = chrono::Utc::now();
    harness(FakeFeed::new(
        "daily-price",
        vec![
            rec("daily-price", "AAPL:d1", now - chrono::Duration::days(2)),
            rec("daily-price", "AAPL:d2", now - chrono::Duration::days(1)),
        ],
    ))
}

fn app_with(h: Harness, shutdown: &Shutdown) -> (Router, Arc<FakeFeed>) {
    let feed = h.feed.clone();
    let runner = Arc::new(SourceRunner::new(
        "daily-price",
        Duration::from_secs(3600),
        h.pipeline,
    ));
    (api::router(AppState::new(vec![runner], shutdown.signal())), feed)
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, String::from_utf8(bytes).expect("utf8"))
}

#[tokio::test]
async fn health_is_ok() {
    let sd = Shutdown::new();
    let (app, _) = app_with(daily_price(), &sd);
    let (status, body) = call(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.trim(), "ok");
}

#[tokio::test]
async fn collect_route_runs_a_cycle_and_reports_outcome() {
    let sd = Shutdown::new();
    let (app, _) = app_with(daily_price(), &sd);

    let (status, body) = call(&app, "POST", "/daily-price-collect").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["outcome"], "collected");
    assert_eq!(v["delivered"], 2);

    // nothing new on the second call
    let (_, body) = call(&app, "POST", "/daily-price-collect").await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["delivered"], 0);
}

#[tokio::test]
async fn unknown_source_is_404_and_get_is_405() {
    let sd = Shutdown::new();
    let (app, _) = app_with(daily_price(), &sd);

    let (status, _) = call(&app, "POST", "/nope-collect").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "GET", "/daily-price-collect").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn sources_lists_runner_state_and_watermark() {
    let sd = Shutdown::new();
    let (app, _) = app_with(daily_price(), &sd);

    let (_, body) = call(&app, "GET", "/sources").await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v[0]["name"], "daily-price");
    assert_eq!(v[0]["intervalSecs"], 3600);
    assert_eq!(v[0]["running"], false);
    assert!(v[0]["watermark"].is_null());

    call(&app, "POST", "/daily-price-collect").await;
    let (_, body) = call(&app, "GET", "/sources").await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert!(v[0]["watermark"].is_string());
}

#[tokio::test]
async fn unrecoverable_cycle_error_is_bad_gateway() {
    let sd = Shutdown::new();
    let (app, feed) = app_with(daily_price(), &sd);
    feed.fail_next(CollectError::Parse("garbage".into()));

    let (status, body) = call(&app, "POST", "/daily-price-collect").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["outcome"], "failed");
    assert_eq!(v["source"], "daily-price");
}

#[tokio::test]
async fn trigger_during_shutdown_is_skipped() {
    let sd = Shutdown::new();
    let (app, feed) = app_with(daily_price(), &sd);
    sd.trigger();

    let (status, body) = call(&app, "POST", "/daily-price-collect").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["outcome"], "skipped");
    assert_eq!(v["reason"], "shutting_down");
    assert_eq!(feed.fetches.load(std::sync::atomic::Ordering::SeqCst), 0);
}
