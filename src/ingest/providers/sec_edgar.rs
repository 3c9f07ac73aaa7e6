//! SEC EDGAR submissions feed (`submissions/CIK{cik}.json`), one page per CIK.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{date_at_midnight, send_get, truncate_chars, Fetched};
use crate::error::CollectError;
use crate::ingest::normalize_text;
use crate::ingest::types::{CollectionWindow, NormalizedRecord, Page, SourceAdapter};

/// Apple, Microsoft, Amazon.
pub const DEFAULT_CIKS: &[&str] = &["0000320193", "0000789019", "0001018724"];

#[derive(Debug, Deserialize)]
struct Submissions {
    #[serde(default)]
    cik: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    filings: Filings,
}
#[derive(Debug, Default, Deserialize)]
struct Filings {
    #[serde(default)]
    recent: Recent,
}
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recent {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    acceptance_date_time: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
}

/// One filing, zipped out of the parallel `recent` arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecFiling {
    pub cik: String,
    pub company: String,
    pub accession: String,
    pub form: String,
    pub filing_date: Option<String>,
    pub acceptance: Option<String>,
    pub primary_document: Option<String>,
}

pub struct SecEdgarAdapter {
    name: String,
    base_url: String,
    api_key: String,
    ciks: Vec<String>,
    client: reqwest::Client,
}

impl SecEdgarAdapter {
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: String,
        ciks: Vec<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            ciks: ciks
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            client,
        }
    }

    /// Zip the submissions arrays, keeping filings dated on or after `since_day`
    /// (`YYYY-MM-DD`). The exact window bound is enforced by the caller.
    pub fn parse_submissions(
        requested_cik: &str,
        body: &str,
        since_day: &str,
    ) -> Result<Vec<SecFiling>, CollectError> {
        let sub: Submissions = serde_json::from_str(body)
            .map_err(|e| CollectError::Parse(format!("sec submissions json cik={requested_cik}: {e}")))?;
        let cik = sub
            .cik
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| requested_cik.to_string());
        let company = sub.name.unwrap_or_default().trim().to_string();
        let r = sub.filings.recent;

        let mut out = Vec::new();
        for (i, acc) in r.accession_number.iter().enumerate() {
            let filing_date = r.filing_date.get(i).cloned();
            if let Some(day) = filing_date.as_deref().and_then(|fd| fd.get(..10)) {
                if day < since_day {
                    continue;
                }
            }
            out.push(SecFiling {
                cik: cik.clone(),
                company: company.clone(),
                accession: acc.clone(),
                form: r.form.get(i).map(|f| f.trim().to_string()).unwrap_or_default(),
                filing_date,
                acceptance: r.acceptance_date_time.get(i).cloned(),
                primary_document: r.primary_document.get(i).cloned(),
            });
        }
        Ok(out)
    }

    pub fn document_url(cik: &str, accession: &str, primary_document: Option<&str>) -> String {
        let acc_no_dashes = accession.replace('-', "");
        let doc = primary_document
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{acc_no_dashes}.htm"));
        let cik_num = cik.trim_start_matches('0');
        format!("https://www.sec.gov/Archives/edgar/data/{cik_num}/{acc_no_dashes}/{doc}")
    }
}

fn occurred_at(f: &SecFiling) -> Option<DateTime<Utc>> {
    f.acceptance
        .as_deref()
        .and_then(|a| DateTime::parse_from_rfc3339(a).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            f.filing_date
                .as_deref()
                .and_then(|d| date_at_midnight(d, "%Y-%m-%d", 10))
        })
}

#[async_trait]
impl SourceAdapter for SecEdgarAdapter {
    type Raw = SecFiling;

    fn source_id(&self) -> &str {
        &self.name
    }

    async fn fetch_page(
        &self,
        window: &CollectionWindow,
        page_index: usize,
    ) -> Result<Page<SecFiling>, CollectError> {
        let Some(cik) = self.ciks.get(page_index) else {
            return Ok(Page::last(Vec::new()));
        };
        let has_more = page_index + 1 < self.ciks.len();

        let url = format!("{}/submissions/CIK{}.json", self.base_url, cik);
        let req = self
            .client
            .get(&url)
            .header("X-SEC-API-Key", &self.api_key);
        let since_day = window.since.format("%Y-%m-%d").to_string();
        let items = match send_get(req).await? {
            Fetched::Body(body) => Self::parse_submissions(cik, &body, &since_day)?,
            Fetched::NotFound => {
                tracing::warn!(source = %self.name, cik = %cik, "unknown CIK, skipped");
                Vec::new()
            }
        };
        Ok(Page { items, has_more })
    }

    fn parse_item(&self, f: SecFiling) -> Result<NormalizedRecord, CollectError> {
        if f.accession.trim().is_empty() {
            return Err(CollectError::Parse(format!("cik {}: filing without accession", f.cik)));
        }
        let occurred_at = occurred_at(&f)
            .ok_or_else(|| CollectError::Parse(format!("{}: no usable filing date", f.accession)))?;

        let is_8k = f.form.eq_ignore_ascii_case("8-K");
        let event_type = if is_8k {
            "8K".to_string()
        } else {
            truncate_chars(&f.form, 500)
        };
        let day = occurred_at.format("%Y-%m-%d");
        let title = if !f.company.is_empty() && !f.form.is_empty() {
            format!("{} - {} ({})", f.company, f.form, day)
        } else if !f.form.is_empty() {
            f.form.clone()
        } else {
            f.accession.clone()
        };
        let summary = match (f.company.is_empty(), f.form.is_empty()) {
            (true, true) => None,
            (false, true) => Some(f.company.clone()),
            (true, false) => Some(f.form.clone()),
            (false, false) => Some(format!("{} / {}", f.company, f.form)),
        };

        Ok(NormalizedRecord {
            source_id: self.name.clone(),
            external_id: f.accession.clone(),
            occurred_at,
            payload: json!({
                "source": "SEC_EDGAR",
                "market": "US",
                "itemType": "FACT",
                "title": normalize_text(&title, 500),
                "summary": summary,
                "url": Self::document_url(&f.cik, &f.accession, f.primary_document.as_deref()),
                "cik": f.cik,
                "form": f.form,
                "eventType": event_type,
                "signalRelevant": is_8k,
            }),
        })
    }
}
