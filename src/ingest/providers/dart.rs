//! Open DART disclosure list (`list.json`), page-numbered.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use super::{date_at_midnight, send_get, truncate_chars, Fetched};
use crate::error::CollectError;
use crate::ingest::normalize_text;
use crate::ingest::types::{CollectionWindow, NormalizedRecord, Page, SourceAdapter};

pub const PAGE_COUNT: u32 = 100;

/// Report-name keywords that mark a filing as signal relevant.
pub const SIGNAL_KEYWORDS: &[&str] = &[
    "무상증자",
    "유상증자",
    "영업익",
    "30% 증가",
    "단일판매공급계약",
    "실적",
    "배당",
    "자기주식",
    "M&A",
    "인수",
];

static SIGNAL_RE: Lazy<Regex> = Lazy::new(|| {
    let alts: Vec<String> = SIGNAL_KEYWORDS.iter().map(|k| regex::escape(k)).collect();
    Regex::new(&alts.join("|")).expect("signal keyword regex")
});

pub fn matches_signal_keyword(report_name: &str) -> bool {
    !report_name.trim().is_empty() && SIGNAL_RE.is_match(report_name)
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    page_no: Option<u32>,
    #[serde(default)]
    total_page: Option<u32>,
    #[serde(default)]
    list: Vec<DartRow>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DartRow {
    #[serde(default)]
    pub rcept_no: Option<String>,
    #[serde(default)]
    pub corp_name: Option<String>,
    #[serde(default)]
    pub flr_nm: Option<String>,
    #[serde(default)]
    pub report_nm: Option<String>,
    #[serde(default)]
    pub rcept_dt: Option<String>,
    #[serde(default)]
    pub stock_code: Option<String>,
}

pub struct DartAdapter {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl DartAdapter {
    pub fn new(name: &str, base_url: &str, api_key: String, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    /// Decode one `list.json` page. DART reports errors in-band via `status`.
    pub fn parse_list(body: &str, page_no: u32) -> Result<Page<DartRow>, CollectError> {
        let resp: ListResponse = serde_json::from_str(body)
            .map_err(|e| CollectError::Parse(format!("dart list json: {e}")))?;
        let message = resp.message.unwrap_or_default();
        match resp.status.as_str() {
            "000" => {}
            // no data for the requested range
            "013" => return Ok(Page::last(Vec::new())),
            "800" | "900" => {
                return Err(CollectError::UpstreamUnavailable(format!(
                    "dart status {}: {}",
                    resp.status, message
                )))
            }
            other => {
                return Err(CollectError::UpstreamRejected {
                    status: 200,
                    message: format!("dart status {other}: {message}"),
                })
            }
        }
        let current = resp.page_no.unwrap_or(page_no);
        let has_more = match resp.total_page {
            Some(total) => current < total,
            None => resp.list.len() as u32 >= PAGE_COUNT,
        };
        Ok(Page {
            items: resp.list,
            has_more,
        })
    }
}

#[async_trait]
impl SourceAdapter for DartAdapter {
    type Raw = DartRow;

    fn source_id(&self) -> &str {
        &self.name
    }

    async fn fetch_page(
        &self,
        window: &CollectionWindow,
        page_index: usize,
    ) -> Result<Page<DartRow>, CollectError> {
        let page_no = page_index as u32 + 1;
        let url = format!("{}/list.json", self.base_url);
        let req = self.client.get(&url).query(&[
            ("crtfc_key", self.api_key.clone()),
            ("bgn_de", window.since.format("%Y%m%d").to_string()),
            ("end_de", window.until.format("%Y%m%d").to_string()),
            ("page_no", page_no.to_string()),
            ("page_count", PAGE_COUNT.to_string()),
        ]);
        match send_get(req).await? {
            Fetched::Body(body) => Self::parse_list(&body, page_no),
            Fetched::NotFound => Err(CollectError::UpstreamRejected {
                status: 404,
                message: format!("{url} not found"),
            }),
        }
    }

    fn parse_item(&self, row: DartRow) -> Result<NormalizedRecord, CollectError> {
        let rcept_no = row
            .rcept_no
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CollectError::Parse("dart row without rcept_no".into()))?
            .to_string();
        let occurred_at = row
            .rcept_dt
            .as_deref()
            .and_then(|d| date_at_midnight(d, "%Y%m%d", 8))
            .ok_or_else(|| CollectError::Parse(format!("dart {rcept_no}: bad rcept_dt")))?;

        let report_nm = normalize_text(row.report_nm.as_deref().unwrap_or_default(), 500);
        let corp = row.corp_name.as_deref().unwrap_or_default().trim();
        let filer = row.flr_nm.as_deref().unwrap_or_default().trim();
        let summary = match (corp.is_empty(), filer.is_empty()) {
            (true, true) => None,
            (false, true) => Some(corp.to_string()),
            (true, false) => Some(filer.to_string()),
            (false, false) => Some(format!("{corp} / {filer}")),
        };
        let symbol = row
            .stock_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let signal = matches_signal_keyword(&report_nm);
        let event_type = if signal {
            format!("DART_SIGNAL:{}", truncate_chars(&report_nm, 490))
        } else {
            report_nm.clone()
        };

        Ok(NormalizedRecord {
            source_id: self.name.clone(),
            external_id: rcept_no.clone(),
            occurred_at,
            payload: json!({
                "source": "DART",
                "market": "KR",
                "itemType": "FACT",
                "title": report_nm,
                "summary": summary,
                "url": format!("https://dart.fss.or.kr/dsaf001/main.do?rcpNo={rcept_no}"),
                "symbol": symbol,
                "eventType": event_type,
                "signalRelevant": signal,
            }),
        })
    }
}
