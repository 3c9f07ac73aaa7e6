// src/delivery.rs
use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::counter;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::ingest::types::NormalizedRecord;
use crate::retry::RetryPolicy;

pub const COLLECTED_PATH: &str = "/api/v1/internal/collected-news";
pub const AUTH_HEADER: &str = "X-Internal-Data-Key";

/// Which records of one batch the downstream confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub succeeded_ids: Vec<String>,
    pub failed_ids: Vec<String>,
}

impl DeliveryResult {
    pub fn all_succeeded(batch: &[NormalizedRecord]) -> Self {
        Self {
            succeeded_ids: batch.iter().map(|r| r.external_id.clone()).collect(),
            failed_ids: Vec::new(),
        }
    }

    pub fn all_failed(batch: &[NormalizedRecord]) -> Self {
        Self {
            succeeded_ids: Vec::new(),
            failed_ids: batch.iter().map(|r| r.external_id.clone()).collect(),
        }
    }
}

/// Sends one batch downstream. Implementations never error out: anything not
/// confirmed is reported in `failed_ids`.
#[async_trait::async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, batch: &[NormalizedRecord]) -> DeliveryResult;
}

#[derive(Serialize)]
struct CollectedItems<'a> {
    items: &'a [NormalizedRecord],
}

#[derive(Debug, Deserialize)]
struct DownstreamResponse {
    #[serde(default)]
    results: Option<Vec<ItemOutcome>>,
    #[serde(default)]
    received: Option<u64>,
    #[serde(default)]
    saved: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemOutcome {
    #[serde(alias = "external_id")]
    external_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    success: Option<bool>,
}

impl ItemOutcome {
    fn is_ok(&self) -> bool {
        if let Some(ok) = self.success {
            return ok;
        }
        matches!(
            self.status
                .as_deref()
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "ok" | "success" | "saved" | "duplicate"
        )
    }
}

/// Authenticated HTTP client for the downstream ingestion API.
#[derive(Clone)]
pub struct DeliveryClient {
    endpoint: String,
    api_key: String,
    client: Client,
    retry: RetryPolicy,
}

impl DeliveryClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building delivery http client")?;
        Ok(Self {
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), COLLECTED_PATH),
            api_key: api_key.to_string(),
            client,
            retry,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, batch: &[NormalizedRecord]) -> Result<DeliveryResult, DeliveryError> {
        counter!("delivery_attempts_total").increment(1);
        let rsp = self
            .client
            .post(&self.endpoint)
            .header(AUTH_HEADER, &self.api_key)
            .json(&CollectedItems { items: batch })
            .send()
            .await
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;

        let status = rsp.status();
        if status.is_server_error() {
            return Err(DeliveryError::Unavailable(format!("status {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
            });
        }

        // A body we cannot read after a 2xx is treated like a dropped connection.
        let body = rsp
            .text()
            .await
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;
        Ok(interpret_success_body(batch, &body))
    }
}

/// Per-item outcomes when the body lists them, uniform success otherwise.
fn interpret_success_body(batch: &[NormalizedRecord], body: &str) -> DeliveryResult {
    let parsed: Option<DownstreamResponse> = serde_json::from_str(body).ok();
    let Some(resp) = parsed else {
        return DeliveryResult::all_succeeded(batch);
    };
    let Some(results) = resp.results else {
        tracing::debug!(
            received = resp.received.unwrap_or(0),
            saved = resp.saved.unwrap_or(0),
            "downstream accepted batch"
        );
        return DeliveryResult::all_succeeded(batch);
    };

    let ok: HashSet<&str> = results
        .iter()
        .filter(|o| o.is_ok())
        .map(|o| o.external_id.as_str())
        .collect();
    let mut out = DeliveryResult::default();
    for r in batch {
        if ok.contains(r.external_id.as_str()) {
            out.succeeded_ids.push(r.external_id.clone());
        } else {
            out.failed_ids.push(r.external_id.clone());
        }
    }
    out
}

#[async_trait::async_trait]
impl Deliver for DeliveryClient {
    async fn deliver(&self, batch: &[NormalizedRecord]) -> DeliveryResult {
        if batch.is_empty() {
            return DeliveryResult::default();
        }
        let mut attempt: u32 = 0;
        let result = loop {
            attempt += 1;
            match self.send_once(batch).await {
                Ok(res) => break res,
                Err(e) if e.is_retryable() && attempt < self.retry.attempts() => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        items = batch.len(),
                        "delivery failed, retrying batch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, items = batch.len(), "delivery gave up on batch");
                    break DeliveryResult::all_failed(batch);
                }
            }
        };
        counter!("delivery_failed_items_total").increment(result.failed_ids.len() as u64);
        result
    }
}
