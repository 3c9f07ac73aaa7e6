//! Yonhap economy/industry RSS feeds, one page per feed.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::rss::{parse_feed, FeedItem};
use super::{send_get, Fetched};
use crate::error::CollectError;
use crate::ingest::normalize_text;
use crate::ingest::types::{CollectionWindow, NormalizedRecord, Page, SourceAdapter};

pub const DEFAULT_FEEDS: &[&str] = &["economy", "industry"];

pub const SIGNAL_KEYWORDS: &[&str] = &[
    "급등", "급락", "폭등", "폭락", "상한가", "하한가", "실적", "영업이익", "순이익", "매출",
    "인수", "합병", "M&A", "배당", "무상증자", "유상증자", "공모", "IPO", "상장", "금리",
    "기준금리", "환율", "달러", "반도체", "AI", "인공지능", "삼성전자", "SK하이닉스", "네이버",
    "카카오",
];

static SIGNAL_RE: Lazy<Regex> = Lazy::new(|| {
    let alts: Vec<String> = SIGNAL_KEYWORDS.iter().map(|k| regex::escape(k)).collect();
    Regex::new(&alts.join("|")).expect("signal keyword regex")
});

pub fn matches_signal_keyword(text: &str) -> bool {
    !text.trim().is_empty() && SIGNAL_RE.is_match(text)
}

/// Category label the downstream files a feed under.
fn category(feed: &str) -> String {
    match feed {
        "economy" => "경제".to_string(),
        "industry" => "산업".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

pub struct YonhapAdapter {
    name: String,
    base_url: String,
    feeds: Vec<String>,
    client: reqwest::Client,
}

impl YonhapAdapter {
    pub fn new(name: &str, base_url: &str, feeds: Vec<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            feeds: feeds
                .into_iter()
                .map(|f| f.trim().to_ascii_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for YonhapAdapter {
    type Raw = FeedItem;

    fn source_id(&self) -> &str {
        &self.name
    }

    async fn fetch_page(
        &self,
        _window: &CollectionWindow,
        page_index: usize,
    ) -> Result<Page<FeedItem>, CollectError> {
        let Some(feed) = self.feeds.get(page_index) else {
            return Ok(Page::last(Vec::new()));
        };
        let has_more = page_index + 1 < self.feeds.len();

        let url = format!("{}/rss/{}.xml", self.base_url, feed);
        let items = match send_get(self.client.get(&url)).await? {
            Fetched::Body(body) => parse_feed(&body, feed)?,
            Fetched::NotFound => {
                tracing::warn!(source = %self.name, feed = %feed, "unknown feed, skipped");
                Vec::new()
            }
        };
        Ok(Page { items, has_more })
    }

    fn parse_item(&self, item: FeedItem) -> Result<NormalizedRecord, CollectError> {
        let url = item
            .natural_key()
            .ok_or_else(|| CollectError::Parse(format!("yonhap item without link: {}", item.title)))?
            .to_string();
        let occurred_at = item
            .published_at()
            .ok_or_else(|| CollectError::Parse(format!("{url}: bad pubDate {:?}", item.pub_date)))?;

        let title = normalize_text(&item.title, 500);
        let summary = item
            .description
            .as_deref()
            .map(|d| normalize_text(d, 1000))
            .filter(|d| !d.is_empty());
        let signal = matches_signal_keyword(&title)
            || summary.as_deref().is_some_and(matches_signal_keyword);

        Ok(NormalizedRecord {
            source_id: self.name.clone(),
            external_id: url.clone(),
            occurred_at,
            payload: json!({
                "source": "YONHAP",
                "market": "KR",
                "itemType": "SPEED",
                "title": title,
                "summary": summary,
                "url": url,
                "symbol": null,
                "eventType": format!("YONHAP_{}", category(&item.topic)),
                "signalRelevant": signal,
            }),
        })
    }
}
