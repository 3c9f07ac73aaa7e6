//! Google News search RSS, one page per query. The same article surfacing
//! under several queries keeps one id (its link).

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::rss::{parse_feed, FeedItem};
use super::{send_get, Fetched};
use crate::error::CollectError;
use crate::ingest::normalize_text;
use crate::ingest::types::{CollectionWindow, NormalizedRecord, Page, SourceAdapter};

pub const DEFAULT_QUERIES: &[&str] = &[
    "stock market",
    "nasdaq",
    "S&P 500",
    "federal reserve",
    "tech stocks",
    "earnings report",
    "semiconductor stocks",
];

pub const SIGNAL_KEYWORDS: &[&str] = &[
    "surge", "plunge", "soar", "crash", "rally", "slump", "record high", "record low",
    "all-time high", "earnings beat", "earnings miss", "revenue", "merger", "acquisition",
    "M&A", "dividend", "buyback", "stock split", "IPO", "listing", "interest rate", "Fed",
    "Federal Reserve", "inflation", "recession", "AI", "artificial intelligence",
    "semiconductor", "chip", "nvidia", "apple", "tesla",
];

static SIGNAL_RE: Lazy<Regex> = Lazy::new(|| {
    let alts: Vec<String> = SIGNAL_KEYWORDS.iter().map(|k| regex::escape(k)).collect();
    Regex::new(&format!("(?i){}", alts.join("|"))).expect("signal keyword regex")
});

pub fn matches_signal_keyword(text: &str) -> bool {
    !text.trim().is_empty() && SIGNAL_RE.is_match(text)
}

/// `earnings report` -> `GOOGLE_EARNINGS_REPORT`.
fn event_type(query: &str) -> String {
    format!("GOOGLE_{}", query.trim().replace(' ', "_").to_uppercase())
}

pub struct GoogleNewsAdapter {
    name: String,
    base_url: String,
    queries: Vec<String>,
    client: reqwest::Client,
}

impl GoogleNewsAdapter {
    pub fn new(name: &str, base_url: &str, queries: Vec<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            queries: queries
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect(),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for GoogleNewsAdapter {
    type Raw = FeedItem;

    fn source_id(&self) -> &str {
        &self.name
    }

    async fn fetch_page(
        &self,
        _window: &CollectionWindow,
        page_index: usize,
    ) -> Result<Page<FeedItem>, CollectError> {
        let Some(query) = self.queries.get(page_index) else {
            return Ok(Page::last(Vec::new()));
        };
        let has_more = page_index + 1 < self.queries.len();

        let url = format!("{}/rss/search", self.base_url);
        let req = self.client.get(&url).query(&[
            ("q", query.as_str()),
            ("hl", "en-US"),
            ("gl", "US"),
            ("ceid", "US:en"),
        ]);
        match send_get(req).await? {
            Fetched::Body(body) => Ok(Page {
                items: parse_feed(&body, query)?,
                has_more,
            }),
            Fetched::NotFound => Err(CollectError::UpstreamRejected {
                status: 404,
                message: format!("{url} not found"),
            }),
        }
    }

    fn parse_item(&self, item: FeedItem) -> Result<NormalizedRecord, CollectError> {
        let url = item
            .natural_key()
            .ok_or_else(|| CollectError::Parse(format!("google news item without link: {}", item.title)))?
            .to_string();
        let occurred_at = item
            .published_at()
            .ok_or_else(|| CollectError::Parse(format!("{url}: bad pubDate {:?}", item.pub_date)))?;

        let title = normalize_text(&item.title, 500);
        let publisher = item.publisher.as_deref().unwrap_or("Google News");

        Ok(NormalizedRecord {
            source_id: self.name.clone(),
            external_id: url.clone(),
            occurred_at,
            payload: json!({
                "source": format!("GOOGLE_NEWS:{publisher}"),
                "market": "US",
                "itemType": "SPEED",
                "title": title,
                "summary": format!("Query: {}", item.topic),
                "url": url,
                "symbol": null,
                "eventType": event_type(&item.topic),
                "signalRelevant": matches_signal_keyword(&title),
            }),
        })
    }
}
