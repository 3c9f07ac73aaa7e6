//! Daily OHLCV bars from the Yahoo chart API, one page per symbol.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{round4, send_get, Fetched};
use crate::error::CollectError;
use crate::ingest::types::{CollectionWindow, NormalizedRecord, Page, SourceAdapter};

pub const DEFAULT_SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "META", "TSLA", "NVDA", "JPM", "V", "JNJ",
];

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}
#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}
#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: Option<ChartMeta>,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}
#[derive(Debug, Deserialize)]
struct ChartMeta {
    currency: Option<String>,
}
#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}
#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}
#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// One row of the chart arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub symbol: String,
    pub ts: i64,
    pub currency: Option<String>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<f64>,
}

pub struct DailyPriceAdapter {
    name: String,
    base_url: String,
    symbols: Vec<String>,
    client: reqwest::Client,
}

impl DailyPriceAdapter {
    pub fn new(name: &str, base_url: &str, symbols: Vec<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            symbols: symbols
                .into_iter()
                .map(|s| s.trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            client,
        }
    }

    /// Flatten one chart response into per-day rows.
    pub fn parse_chart(symbol: &str, body: &str) -> Result<Vec<PriceBar>, CollectError> {
        let resp: ChartResponse = serde_json::from_str(body)
            .map_err(|e| CollectError::Parse(format!("chart json for {symbol}: {e}")))?;
        let Some(result) = resp.chart.result.and_then(|r| r.into_iter().next()) else {
            return Ok(Vec::new());
        };

        let currency = result.meta.and_then(|m| m.currency);
        let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
        let adj = result
            .indicators
            .adjclose
            .into_iter()
            .next()
            .map(|a| a.adjclose)
            .unwrap_or_default();
        let at = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();

        Ok(result
            .timestamp
            .iter()
            .enumerate()
            .map(|(i, ts)| PriceBar {
                symbol: symbol.to_string(),
                ts: *ts,
                currency: currency.clone(),
                open: at(&quote.open, i),
                high: at(&quote.high, i),
                low: at(&quote.low, i),
                close: at(&quote.close, i),
                adj_close: at(&adj, i),
                volume: at(&quote.volume, i),
            })
            .collect())
    }
}

#[async_trait]
impl SourceAdapter for DailyPriceAdapter {
    type Raw = PriceBar;

    fn source_id(&self) -> &str {
        &self.name
    }

    async fn fetch_page(
        &self,
        window: &CollectionWindow,
        page_index: usize,
    ) -> Result<Page<PriceBar>, CollectError> {
        let Some(symbol) = self.symbols.get(page_index) else {
            return Ok(Page::last(Vec::new()));
        };
        let has_more = page_index + 1 < self.symbols.len();

        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let req = self.client.get(&url).query(&[
            ("period1", window.since.timestamp().to_string()),
            ("period2", window.until.timestamp().to_string()),
            ("interval", "1d".to_string()),
        ]);
        let items = match send_get(req).await? {
            Fetched::Body(body) => Self::parse_chart(symbol, &body)?,
            Fetched::NotFound => {
                tracing::warn!(source = %self.name, symbol = %symbol, "unknown symbol, skipped");
                Vec::new()
            }
        };
        Ok(Page { items, has_more })
    }

    fn parse_item(&self, bar: PriceBar) -> Result<NormalizedRecord, CollectError> {
        let close = bar
            .close
            .ok_or_else(|| CollectError::Parse(format!("{} @ {}: missing close", bar.symbol, bar.ts)))?;
        let occurred_at = Utc
            .timestamp_opt(bar.ts, 0)
            .single()
            .ok_or_else(|| CollectError::Parse(format!("{}: bad timestamp {}", bar.symbol, bar.ts)))?;
        let date = occurred_at.format("%Y-%m-%d").to_string();

        let volume = bar.volume.map(|v| v.max(0.0) as u64).unwrap_or(0);
        let traded_value = (volume as f64 * close) as u64;

        Ok(NormalizedRecord {
            source_id: self.name.clone(),
            external_id: format!("{}:{}", bar.symbol, date),
            occurred_at,
            payload: json!({
                "symbol": bar.symbol,
                "market": "US",
                "itemType": "PRICE",
                "date": date,
                "currency": bar.currency,
                "open": bar.open.map(round4),
                "high": bar.high.map(round4),
                "low": bar.low.map(round4),
                "close": round4(close),
                "adjClose": bar.adj_close.map(round4),
                "volume": volume,
                "tradedValue": traded_value,
            }),
        })
    }
}
