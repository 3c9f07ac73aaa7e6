// src/ingest/mod.rs
pub mod pipeline;
pub mod providers;
pub mod scheduler;
pub mod types;

use crate::error::CollectError;
use crate::ingest::types::{Collect, CollectionWindow, NormalizedRecord, SourceAdapter};
use crate::retry::RetryPolicy;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "collect_records_total",
            "Records parsed from providers inside the requested window."
        );
        describe_counter!(
            "collect_parse_errors_total",
            "Provider items skipped because they failed to parse."
        );
        describe_counter!(
            "collect_window_filtered_total",
            "Records dropped for falling outside the collection window."
        );
        describe_counter!(
            "collect_provider_errors_total",
            "Provider page fetch failures (before retry)."
        );
        describe_histogram!("collect_fetch_ms", "Full paginated fetch time in milliseconds.");
        describe_counter!("delivery_attempts_total", "Downstream delivery calls made.");
        describe_counter!(
            "delivery_failed_items_total",
            "Records the downstream did not confirm."
        );
        describe_counter!("cycle_outcomes_total", "Collection cycle outcomes by kind.");
        describe_gauge!(
            "watermark_position_ts",
            "Unix ts of the per-source watermark position."
        );
    });
}

/// Normalize display text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }

    out
}

/// Drives a [`SourceAdapter`] through a full window: paginates, retries transient
/// page failures, skips unparseable items and trims to the window bounds.
pub struct AdapterCollector<A> {
    adapter: A,
    retry: RetryPolicy,
}

impl<A: SourceAdapter> AdapterCollector<A> {
    pub fn new(adapter: A, retry: RetryPolicy) -> Self {
        Self { adapter, retry }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }
}

#[async_trait::async_trait]
impl<A: SourceAdapter> Collect for AdapterCollector<A> {
    fn source_id(&self) -> &str {
        self.adapter.source_id()
    }

    async fn collect(&self, window: CollectionWindow) -> Result<Vec<NormalizedRecord>, CollectError> {
        collect_window(&self.adapter, &window, &self.retry).await
    }
}

/// Fetch every page of `window`; any page that still fails after retries fails the call.
pub async fn collect_window<A: SourceAdapter + ?Sized>(
    adapter: &A,
    window: &CollectionWindow,
    retry: &RetryPolicy,
) -> Result<Vec<NormalizedRecord>, CollectError> {
    ensure_metrics_described();
    let source = adapter.source_id().to_string();
    let t0 = std::time::Instant::now();

    let mut out = Vec::new();
    let mut parse_errors = 0u64;
    let mut out_of_window = 0u64;
    let mut page_index = 0usize;

    loop {
        let page = fetch_page_with_retry(adapter, window, page_index, retry).await?;
        for raw in page.items {
            match adapter.parse_item(raw) {
                Ok(rec) if window.contains(rec.occurred_at) => out.push(rec),
                Ok(rec) => {
                    out_of_window += 1;
                    tracing::debug!(
                        source = %source,
                        external_id = %rec.external_id,
                        occurred_at = %rec.occurred_at,
                        "record outside window dropped"
                    );
                }
                Err(e) => {
                    parse_errors += 1;
                    tracing::warn!(source = %source, error = %e, "skipping unparseable item");
                }
            }
        }
        if !page.has_more {
            break;
        }
        page_index += 1;
    }

    histogram!("collect_fetch_ms", "source" => source.clone())
        .record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("collect_records_total", "source" => source.clone()).increment(out.len() as u64);
    counter!("collect_parse_errors_total", "source" => source.clone()).increment(parse_errors);
    counter!("collect_window_filtered_total", "source" => source).increment(out_of_window);

    Ok(out)
}

async fn fetch_page_with_retry<A: SourceAdapter + ?Sized>(
    adapter: &A,
    window: &CollectionWindow,
    page_index: usize,
    retry: &RetryPolicy,
) -> Result<types::Page<A::Raw>, CollectError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match adapter.fetch_page(window, page_index).await {
            Ok(page) => return Ok(page),
            Err(e) => {
                counter!("collect_provider_errors_total", "source" => adapter.source_id().to_string())
                    .increment(1);
                if e.is_transient() && attempt < retry.attempts() {
                    tracing::warn!(
                        source = adapter.source_id(),
                        page = page_index,
                        attempt,
                        error = %e,
                        "page fetch failed, retrying"
                    );
                    tokio::time::sleep(retry.delay_after(attempt)).await;
                    continue;
                }
                return Err(e);
            }
        }
    }
}
