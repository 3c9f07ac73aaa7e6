// tests/common/mod.rs
//
// In-memory provider and downstream doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use market_collector::delivery::{Deliver, DeliveryResult};
use market_collector::error::CollectError;
use market_collector::ingest::types::{CollectionWindow, NormalizedRecord, Page, SourceAdapter};
use market_collector::ingest::AdapterCollector;
use market_collector::retry::RetryPolicy;
use market_collector::watermark::{MemoryWatermarkStore, WatermarkStore, WatermarkTracker};
use market_collector::SourcePipeline;

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
}

pub fn rec(source: &str, id: &str, occurred_at: DateTime<Utc>) -> NormalizedRecord {
    NormalizedRecord {
        source_id: source.to_string(),
        external_id: id.to_string(),
        occurred_at,
        payload: serde_json::json!({ "title": id }),
    }
}

/// Provider double: serves `items` split into pages of `page_size`.
/// `fail_next` is consumed by the next page fetch. When `gate` is set every
/// fetch signals `entered` and then waits on the gate.
pub struct FakeFeed {
    pub name: String,
    pub items: Mutex<Vec<NormalizedRecord>>,
    pub page_size: usize,
    pub fail_next: Mutex<Option<CollectError>>,
    pub windows: Mutex<Vec<CollectionWindow>>,
    pub fetches: AtomicUsize,
    pub gate: Option<Arc<Notify>>,
    pub entered: Arc<Notify>,
}

impl FakeFeed {
    pub fn new(name: &str, items: Vec<NormalizedRecord>) -> Self {
        Self {
            name: name.to_string(),
            items: Mutex::new(items),
            page_size: 2,
            fail_next: Mutex::new(None),
            windows: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn set_items(&self, items: Vec<NormalizedRecord>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn fail_next(&self, e: CollectError) {
        *self.fail_next.lock().unwrap() = Some(e);
    }

    pub fn last_window(&self) -> Option<CollectionWindow> {
        self.windows.lock().unwrap().last().copied()
    }
}

#[async_trait]
impl SourceAdapter for FakeFeed {
    type Raw = NormalizedRecord;

    fn source_id(&self) -> &str {
        &self.name
    }

    async fn fetch_page(
        &self,
        window: &CollectionWindow,
        page_index: usize,
    ) -> Result<Page<NormalizedRecord>, CollectError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if page_index == 0 {
            self.windows.lock().unwrap().push(*window);
        }
        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            gate.notified().await;
        }
        let failure = self.fail_next.lock().unwrap().take();
        if let Some(e) = failure {
            return Err(e);
        }
        let all = self.items.lock().unwrap().clone();
        let start = page_index * self.page_size;
        let items: Vec<_> = all.iter().skip(start).take(self.page_size).cloned().collect();
        Ok(Page {
            items,
            has_more: start + self.page_size < all.len(),
        })
    }

    fn parse_item(&self, raw: NormalizedRecord) -> Result<NormalizedRecord, CollectError> {
        if raw.external_id.is_empty() {
            return Err(CollectError::Parse("empty id".into()));
        }
        Ok(raw)
    }
}

/// Downstream double. Ids in `reject` are reported failed; `down` fails whole batches.
/// With `stall` set, calls from that index on wait for the notify before answering.
#[derive(Default)]
pub struct FakeDownstream {
    pub batches: Mutex<Vec<Vec<String>>>,
    pub reject: Mutex<HashSet<String>>,
    pub down: Mutex<bool>,
    pub calls: AtomicUsize,
    pub stall: Mutex<Option<(usize, Arc<Notify>)>>,
}

impl FakeDownstream {
    pub fn delivered_ids(&self) -> Vec<String> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn reject_ids(&self, ids: &[&str]) {
        *self.reject.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    pub fn stall_from(&self, call: usize, release: Arc<Notify>) {
        *self.stall.lock().unwrap() = Some((call, release));
    }

    /// Times `id` reached the downstream.
    pub fn count(&self, id: &str) -> usize {
        self.delivered_ids().iter().filter(|d| *d == id).count()
    }
}

#[async_trait]
impl Deliver for FakeDownstream {
    async fn deliver(&self, batch: &[NormalizedRecord]) -> DeliveryResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let stall = self.stall.lock().unwrap().clone();
        if let Some((from, release)) = stall {
            if call >= from {
                release.notified().await;
            }
        }
        if *self.down.lock().unwrap() {
            return DeliveryResult::all_failed(batch);
        }
        let reject = self.reject.lock().unwrap().clone();
        let mut out = DeliveryResult::default();
        let mut accepted = Vec::new();
        for r in batch {
            if reject.contains(&r.external_id) {
                out.failed_ids.push(r.external_id.clone());
            } else {
                out.succeeded_ids.push(r.external_id.clone());
                accepted.push(r.external_id.clone());
            }
        }
        self.batches.lock().unwrap().push(accepted);
        out
    }
}

pub struct Harness {
    pub feed: Arc<FakeFeed>,
    pub downstream: Arc<FakeDownstream>,
    pub store: Arc<dyn WatermarkStore>,
    pub pipeline: SourcePipeline,
}

/// Shares one [`FakeFeed`] between the collector and the test body.
pub struct FakeFeedRef(pub Arc<FakeFeed>);

#[async_trait]
impl SourceAdapter for FakeFeedRef {
    type Raw = NormalizedRecord;

    fn source_id(&self) -> &str {
        self.0.source_id()
    }

    async fn fetch_page(
        &self,
        window: &CollectionWindow,
        page_index: usize,
    ) -> Result<Page<NormalizedRecord>, CollectError> {
        self.0.fetch_page(window, page_index).await
    }

    fn parse_item(&self, raw: NormalizedRecord) -> Result<NormalizedRecord, CollectError> {
        self.0.parse_item(raw)
    }
}

pub fn harness_with_store(feed: FakeFeed, store: Arc<dyn WatermarkStore>, batch_size: usize) -> Harness {
    let feed = Arc::new(feed);
    let collector = Arc::new(AdapterCollector::new(
        FakeFeedRef(feed.clone()),
        RetryPolicy::immediate(2),
    ));
    let downstream = Arc::new(FakeDownstream::default());
    let tracker: Arc<WatermarkTracker<dyn WatermarkStore>> =
        Arc::new(WatermarkTracker::new(store.clone()));
    let pipeline = SourcePipeline {
        source: collector,
        tracker,
        deliver: downstream.clone(),
        lookback_days: 3,
        batch_size,
    };
    Harness {
        feed,
        downstream,
        store,
        pipeline,
    }
}

pub fn harness(feed: FakeFeed) -> Harness {
    harness_with_store(feed, Arc::new(MemoryWatermarkStore::new()), 100)
}
