//! Earnings event feed (Yahoo quoteSummary `earningsHistory`), one page per symbol.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{round4, send_get, Fetched};
use crate::error::CollectError;
use crate::ingest::types::{CollectionWindow, NormalizedRecord, Page, SourceAdapter};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    quote_summary: QuoteSummary,
}
#[derive(Debug, Deserialize)]
struct QuoteSummary {
    #[serde(default)]
    result: Option<Vec<SummaryResult>>,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResult {
    #[serde(default)]
    earnings_history: Option<EarningsHistory>,
}
#[derive(Debug, Deserialize)]
struct EarningsHistory {
    #[serde(default)]
    history: Vec<HistoryRow>,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRow {
    #[serde(default)]
    quarter: Option<RawValue<i64>>,
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    eps_actual: Option<RawValue<f64>>,
    #[serde(default)]
    eps_estimate: Option<RawValue<f64>>,
    #[serde(default)]
    surprise_percent: Option<RawValue<f64>>,
}
#[derive(Debug, Deserialize)]
struct RawValue<T> {
    raw: Option<T>,
}

fn raw<T>(v: Option<RawValue<T>>) -> Option<T> {
    v.and_then(|r| r.raw)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EarningsRow {
    pub symbol: String,
    pub quarter_ts: Option<i64>,
    pub period: Option<String>,
    pub eps_actual: Option<f64>,
    pub eps_estimate: Option<f64>,
    pub surprise_percent: Option<f64>,
}

pub struct EarningsAdapter {
    name: String,
    base_url: String,
    symbols: Vec<String>,
    client: reqwest::Client,
}

impl EarningsAdapter {
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

    pub fn parse_summary(symbol: &str, body: &str) -> Result<Vec<EarningsRow>, CollectError> {
        let resp: SummaryResponse = serde_json::from_str(body)
            .map_err(|e| CollectError::Parse(format!("quoteSummary json for {symbol}: {e}")))?;
        let history = resp
            .quote_summary
            .result
            .and_then(|r| r.into_iter().next())
            .and_then(|r| r.earnings_history)
            .map(|h| h.history)
            .unwrap_or_default();
        Ok(history
            .into_iter()
            .map(|h| EarningsRow {
                symbol: symbol.to_string(),
                quarter_ts: raw(h.quarter),
                period: h.period,
                eps_actual: raw(h.eps_actual),
                eps_estimate: raw(h.eps_estimate),
                surprise_percent: raw(h.surprise_percent),
            })
            .collect())
    }
}

#[async_trait]
impl SourceAdapter for EarningsAdapter {
    type Raw = EarningsRow;

    fn source_id(&self) -> &str {
        &self.name
    }

    async fn fetch_page(
        &self,
        _window: &CollectionWindow,
        page_index: usize,
    ) -> Result<Page<EarningsRow>, CollectError> {
        let Some(symbol) = self.symbols.get(page_index) else {
            return Ok(Page::last(Vec::new()));
        };
        let has_more = page_index + 1 < self.symbols.len();

        let url = format!("{}/v10/finance/quoteSummary/{}", self.base_url, symbol);
        let req = self.client.get(&url).query(&[("modules", "earningsHistory")]);
        let items = match send_get(req).await? {
            Fetched::Body(body) => Self::parse_summary(symbol, &body)?,
            Fetched::NotFound => {
                tracing::warn!(source = %self.name, symbol = %symbol, "unknown symbol, skipped");
                Vec::new()
            }
        };
        Ok(Page { items, has_more })
    }

    fn parse_item(&self, row: EarningsRow) -> Result<NormalizedRecord, CollectError> {
        let ts = row
            .quarter_ts
            .ok_or_else(|| CollectError::Parse(format!("{}: earnings row without quarter", row.symbol)))?;
        let occurred_at = Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| CollectError::Parse(format!("{}: bad quarter ts {ts}", row.symbol)))?;
        let day = occurred_at.format("%Y-%m-%d").to_string();

        Ok(NormalizedRecord {
            source_id: self.name.clone(),
            external_id: format!("{}:earnings:{}", row.symbol, day),
            occurred_at,
            payload: json!({
                "source": "YAHOO_FINANCE",
                "market": "US",
                "itemType": "BUZZ",
                "title": format!("Earnings: {} ({})", row.symbol, day),
                "url": format!("https://finance.yahoo.com/calendar/earnings?symbol={}", row.symbol),
                "symbol": row.symbol,
                "eventType": "earnings",
                "period": row.period,
                "epsActual": row.eps_actual.map(round4),
                "epsEstimate": row.eps_estimate.map(round4),
                "surprisePercent": row.surprise_percent.map(round4),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = r#"{"quoteSummary":{"result":[{"earningsHistory":{"history":[
        {"quarter":{"raw":1727654400,"fmt":"2024-09-30"},"period":"-1q",
         "epsActual":{"raw":1.64},"epsEstimate":{"raw":1.6},"surprisePercent":{"raw":0.025}},
        {"period":"0q","epsActual":{}}
    ]}}],"error":null}}"#;

    #[test]
    fn history_rows_become_events() {
        let rows = EarningsAdapter::parse_summary("AAPL", SUMMARY).unwrap();
        assert_eq!(rows.len(), 2);

        let a = EarningsAdapter::new("earnings", "http://localhost", vec!["aapl".into()], reqwest::Client::new());
        let rec = a.parse_item(rows[0].clone()).unwrap();
        assert_eq!(rec.external_id, "AAPL:earnings:2024-09-30");
        assert_eq!(rec.payload["epsActual"], json!(1.64));
        assert_eq!(rec.payload["itemType"], json!("BUZZ"));

        assert!(a.parse_item(rows[1].clone()).is_err());
    }
}
