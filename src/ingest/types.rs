// src/ingest/types.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollectError;

/// Common record shape handed to the downstream API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub source_id: String,   // e.g. "dart", "sec-edgar"
    pub external_id: String, // provider natural key, sole dedup key
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Half-open range `[since, until)` bounding one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl CollectionWindow {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// Window ending at `now` and reaching back `days`, clamped to the earliest
    /// representable instant.
    pub fn lookback(now: DateTime<Utc>, days: u32) -> Self {
        let since = Duration::try_days(i64::from(days))
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { since, until: now }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.since <= t && t < self.until
    }
}

/// One page of provider-native items.
#[derive(Debug)]
pub struct Page<R> {
    pub items: Vec<R>,
    pub has_more: bool,
}

impl<R> Page<R> {
    pub fn last(items: Vec<R>) -> Self {
        Self {
            items,
            has_more: false,
        }
    }
}

/// Provider capabilities: fetch one page, say whether more follow, parse one item.
///
/// Implementors only describe the provider; pagination, retries and window
/// filtering live in [`crate::ingest::collect_window`].
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    type Raw: Send;

    fn source_id(&self) -> &str;

    async fn fetch_page(
        &self,
        window: &CollectionWindow,
        page_index: usize,
    ) -> Result<Page<Self::Raw>, CollectError>;

    fn parse_item(&self, raw: Self::Raw) -> Result<NormalizedRecord, CollectError>;
}

/// Object-safe view of a source: `collect(window)` fully paginated and window-filtered.
#[async_trait::async_trait]
pub trait Collect: Send + Sync {
    fn source_id(&self) -> &str;
    async fn collect(&self, window: CollectionWindow) -> Result<Vec<NormalizedRecord>, CollectError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn lookback_reaches_back_whole_days() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let w = CollectionWindow::lookback(now, 3);
        assert_eq!(w.since, Utc.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap());
        assert!(w.contains(w.since));
        assert!(!w.contains(now));
    }

    #[test]
    fn huge_lookback_clamps_instead_of_overflowing() {
        let w = CollectionWindow::lookback(Utc::now(), u32::MAX);
        assert_eq!(w.since, DateTime::<Utc>::MIN_UTC);
    }
}
