//! RSS 2.0 channel decoding shared by the news feed adapters.

use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::error::CollectError;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RawItem>,
}
#[derive(Debug, Deserialize)]
struct RawItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<TextTag>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    source: Option<TextTag>,
}

/// Element with attributes whose text is all we keep (`<guid isPermaLink=..>`, `<source url=..>`).
#[derive(Debug, Deserialize)]
struct TextTag {
    #[serde(rename = "$text", default)]
    text: String,
}

/// One `<item>` as found in the feed, tagged with the page it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: Option<String>,
    pub pub_date: Option<String>,
    pub description: Option<String>,
    /// Publisher named in `<source>` (Google News).
    pub publisher: Option<String>,
    /// Feed category or search query this item was listed under.
    pub topic: String,
}

impl FeedItem {
    /// Dedup key of a news item: the link, or the guid when the feed has no link.
    pub fn natural_key(&self) -> Option<&str> {
        self.link.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        parse_pub_date(self.pub_date.as_deref()?)
    }
}

/// Decode a channel. Items without a title are dropped.
pub fn parse_feed(body: &str, topic: &str) -> Result<Vec<FeedItem>, CollectError> {
    let xml_clean = scrub_html_entities_for_xml(body);
    let rss: Rss = from_str(&xml_clean).map_err(|e| CollectError::Parse(format!("rss xml: {e}")))?;

    Ok(rss
        .channel
        .item
        .into_iter()
        .filter_map(|it| {
            let title = it.title.as_deref().map(str::trim).unwrap_or_default();
            if title.is_empty() {
                return None;
            }
            let guid = it.guid.map(|g| g.text.trim().to_string()).filter(|g| !g.is_empty());
            Some(FeedItem {
                title: title.to_string(),
                link: it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).or(guid),
                pub_date: it.pub_date,
                description: it.description,
                publisher: it.source.map(|s| s.text.trim().to_string()).filter(|s| !s.is_empty()),
                topic: topic.to_string(),
            })
        })
        .collect())
}

/// RFC 2822 `pubDate`, normalized to UTC.
pub fn parse_pub_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&middot;", "·")
}
