// tests/delivery_http.rs
//
// Delivery client against a scripted downstream served from 127.0.0.1:0.

mod common;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
use common::{at, rec};
use market_collector::delivery::{Deliver, DeliveryClient, AUTH_HEADER, COLLECTED_PATH};
use market_collector::retry::RetryPolicy;
use serde_json::Value;

const KEY: &str = "test-secret";

#[derive(Clone, Default)]
struct Downstream {
    hits: Arc<AtomicUsize>,
    script: Arc<Mutex<VecDeque<(u16, String)>>>,
    keys: Arc<Mutex<Vec<Option<String>>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl Downstream {
    fn scripted(responses: &[(u16, &str)]) -> Self {
        let d = Self::default();
        *d.script.lock().unwrap() = responses.iter().map(|(s, b)| (*s, b.to_string())).collect();
        d
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn collected(
    State(d): State<Downstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    d.hits.fetch_add(1, Ordering::SeqCst);
    d.keys.lock().unwrap().push(
        headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );
    d.bodies.lock().unwrap().push(body);
    // an exhausted script keeps answering with a plain 200
    let (status, body) = d
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or((200, "{}".to_string()));
    (StatusCode::from_u16(status).unwrap(), body)
}

async fn serve(d: Downstream) -> String {
    let app = Router::new().route(COLLECTED_PATH, post(collected)).with_state(d);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base: &str) -> DeliveryClient {
    DeliveryClient::new(base, KEY, Duration::from_secs(5), RetryPolicy::immediate(3)).unwrap()
}

fn batch() -> Vec<market_collector::ingest::types::NormalizedRecord> {
    vec![
        rec("dart", "a", at(8, 0)),
        rec("dart", "b", at(8, 1)),
        rec("dart", "c", at(8, 2)),
    ]
}

#[tokio::test]
async fn retries_server_errors_then_succeeds() {
    let d = Downstream::scripted(&[(503, "busy"), (502, "bad gateway")]);
    let base = serve(d.clone()).await;

    let res = client(&base).deliver(&batch()).await;
    assert_eq!(res.succeeded_ids, vec!["a", "b", "c"]);
    assert!(res.failed_ids.is_empty());
    assert_eq!(d.hits(), 3);
    assert!(d.keys.lock().unwrap().iter().all(|k| k.as_deref() == Some(KEY)));
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let d = Downstream::scripted(&[(500, ""), (500, ""), (500, ""), (500, "")]);
    let base = serve(d.clone()).await;

    let res = client(&base).deliver(&batch()).await;
    assert!(res.succeeded_ids.is_empty());
    assert_eq!(res.failed_ids, vec!["a", "b", "c"]);
    assert_eq!(d.hits(), 3);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let d = Downstream::scripted(&[(401, "bad key")]);
    let base = serve(d.clone()).await;

    let res = client(&base).deliver(&batch()).await;
    assert_eq!(res.failed_ids.len(), 3);
    assert_eq!(d.hits(), 1);
}

#[tokio::test]
async fn per_item_results_are_honored() {
    let body = r#"{"received":3,"saved":1,"results":[
        {"externalId":"a","status":"saved"},
        {"externalId":"b","status":"error"}
    ]}"#;
    let d = Downstream::scripted(&[(200, body)]);
    let base = serve(d.clone()).await;

    let res = client(&base).deliver(&batch()).await;
    assert_eq!(res.succeeded_ids, vec!["a"]);
    // "c" is missing from the results list
    assert_eq!(res.failed_ids, vec!["b", "c"]);
}

#[tokio::test]
async fn request_body_wraps_camel_case_items() {
    let d = Downstream::default();
    let base = serve(d.clone()).await;

    client(&base).deliver(&batch()[..1]).await;
    let bodies = d.bodies.lock().unwrap();
    let item = &bodies[0]["items"][0];
    assert_eq!(item["externalId"], "a");
    assert_eq!(item["sourceId"], "dart");
    assert!(item["occurredAt"].as_str().unwrap().starts_with("2025-03-08T00:00:00"));
    assert_eq!(item["payload"]["title"], "a");
}

#[tokio::test]
async fn unreachable_downstream_fails_the_batch() {
    // grab a free port and close it again
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let res = client(&format!("http://{addr}")).deliver(&batch()).await;
    assert!(res.succeeded_ids.is_empty());
    assert_eq!(res.failed_ids.len(), 3);
}

#[tokio::test]
async fn empty_batch_makes_no_call() {
    let d = Downstream::default();
    let base = serve(d.clone()).await;

    let res = client(&base).deliver(&[]).await;
    assert!(res.succeeded_ids.is_empty() && res.failed_ids.is_empty());
    assert_eq!(d.hits(), 0);
}
