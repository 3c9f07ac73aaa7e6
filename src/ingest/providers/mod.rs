// src/ingest/providers/mod.rs
pub mod daily_price;
pub mod dart;
pub mod earnings;
pub mod google_news;
pub mod rss;
pub mod sec_edgar;
pub mod yonhap;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::StatusCode;

use crate::config::{SourceConfig, SourceKind};
use crate::error::CollectError;
use crate::ingest::types::Collect;
use crate::ingest::AdapterCollector;
use crate::retry::RetryPolicy;

pub const USER_AGENT: &str = "market-collector/0.1 (data collection)";

/// Outcome of a provider GET that tolerates a missing entity.
pub(crate) enum Fetched {
    Body(String),
    NotFound,
}

/// Send a GET and classify the response. A 404 is reported separately so
/// per-symbol adapters can skip an unknown ticker without failing the cycle.
pub(crate) async fn send_get(req: reqwest::RequestBuilder) -> Result<Fetched, CollectError> {
    let resp = req
        .send()
        .await
        .map_err(|e| CollectError::from_transport(&e))?;
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(Fetched::NotFound);
    }
    let body = resp
        .text()
        .await
        .map_err(|e| CollectError::from_transport(&e))?;
    if !status.is_success() {
        return Err(CollectError::from_status(status, &body));
    }
    Ok(Fetched::Body(body))
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("building provider http client")
}

/// `YYYY-MM-DD` (or a longer string starting with one) at midnight UTC.
pub(crate) fn date_at_midnight(s: &str, fmt: &str, len: usize) -> Option<DateTime<Utc>> {
    let head = s.get(..len)?;
    let d = NaiveDate::parse_from_str(head, fmt).ok()?;
    Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?))
}

pub(crate) fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Build the collector for one configured source.
pub fn build_collector(
    cfg: &SourceConfig,
    retry: RetryPolicy,
    timeout: Duration,
) -> Result<Arc<dyn Collect>> {
    let client = http_client(timeout)?;
    let out: Arc<dyn Collect> = match cfg.kind {
        SourceKind::DailyPrice => Arc::new(AdapterCollector::new(
            daily_price::DailyPriceAdapter::new(&cfg.name, &cfg.base_url, cfg.symbols.clone(), client),
            retry,
        )),
        SourceKind::Dart => Arc::new(AdapterCollector::new(
            dart::DartAdapter::new(&cfg.name, &cfg.base_url, cfg.api_key.clone().unwrap_or_default(), client),
            retry,
        )),
        SourceKind::SecEdgar => Arc::new(AdapterCollector::new(
            sec_edgar::SecEdgarAdapter::new(
                &cfg.name,
                &cfg.base_url,
                cfg.api_key.clone().unwrap_or_default(),
                cfg.symbols.clone(),
                client,
            ),
            retry,
        )),
        SourceKind::Earnings => Arc::new(AdapterCollector::new(
            earnings::EarningsAdapter::new(&cfg.name, &cfg.base_url, cfg.symbols.clone(), client),
            retry,
        )),
        SourceKind::Yonhap => Arc::new(AdapterCollector::new(
            yonhap::YonhapAdapter::new(&cfg.name, &cfg.base_url, cfg.symbols.clone(), client),
            retry,
        )),
        SourceKind::GoogleNews => Arc::new(AdapterCollector::new(
            google_news::GoogleNewsAdapter::new(&cfg.name, &cfg.base_url, cfg.symbols.clone(), client),
            retry,
        )),
    };
    Ok(out)
}
