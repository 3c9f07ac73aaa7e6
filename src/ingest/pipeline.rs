// src/ingest/pipeline.rs
//! One collection cycle: window → collect → filter → deliver → advance.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;

use crate::delivery::Deliver;
use crate::error::{CollectError, CycleError};
use crate::ingest::scheduler::ShutdownSignal;
use crate::ingest::types::{Collect, CollectionWindow, NormalizedRecord};
use crate::watermark::{WatermarkStore, WatermarkTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UpstreamRejected,
    AlreadyRunning,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Collected {
        delivered: usize,
    },
    Skipped {
        reason: SkipReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    PartialFailure {
        delivered: usize,
        failed: usize,
    },
}

impl CycleOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        CycleOutcome::Skipped {
            reason,
            detail: None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Collected { .. } => "collected",
            CycleOutcome::Skipped { .. } => "skipped",
            CycleOutcome::PartialFailure { .. } => "partial_failure",
        }
    }
}

/// Everything one source's cycle needs. Owned by that source's runner.
pub struct SourcePipeline {
    pub source: Arc<dyn Collect>,
    pub tracker: Arc<WatermarkTracker<dyn WatermarkStore>>,
    pub deliver: Arc<dyn Deliver>,
    pub lookback_days: u32,
    pub batch_size: usize,
}

impl SourcePipeline {
    pub fn source_id(&self) -> &str {
        self.source.source_id()
    }

    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        shutdown: &ShutdownSignal,
    ) -> Result<CycleOutcome, CycleError> {
        crate::ingest::ensure_metrics_described();
        let source = self.source_id().to_string();
        let res = self.run_cycle_inner(&source, now, shutdown).await;
        let label = match &res {
            Ok(o) => o.label(),
            Err(_) => "error",
        };
        counter!("cycle_outcomes_total", "source" => source, "outcome" => label).increment(1);
        res
    }

    async fn run_cycle_inner(
        &self,
        source: &str,
        now: DateTime<Utc>,
        shutdown: &ShutdownSignal,
    ) -> Result<CycleOutcome, CycleError> {
        if shutdown.is_requested() {
            return Ok(CycleOutcome::skipped(SkipReason::ShuttingDown));
        }

        let window = self
            .tracker
            .window_for(source, now, self.lookback_days)
            .await
            .map_err(CycleError::Store)?;

        let records = match self.source.collect(window).await {
            Ok(r) => r,
            Err(e @ CollectError::UpstreamRejected { .. }) => {
                tracing::warn!(source, error = %e, "upstream rejected request, skipping cycle");
                return Ok(CycleOutcome::Skipped {
                    reason: SkipReason::UpstreamRejected,
                    detail: Some(e.to_string()),
                });
            }
            Err(e) => {
                tracing::error!(source, error = %e, "collection failed");
                return Err(CycleError::Upstream(e));
            }
        };
        let fetched = records.len();

        let fresh = self
            .tracker
            .filter_new(source, records.clone())
            .await
            .map_err(CycleError::Store)?;
        tracing::info!(
            source,
            window_since = %window.since,
            window_until = %window.until,
            fetched,
            new = fresh.len(),
            "collected"
        );
        if fresh.is_empty() {
            return Ok(CycleOutcome::Collected { delivered: 0 });
        }

        let succeeded = self
            .deliver_all(source, &window, &records, &fresh, shutdown)
            .await?;
        let delivered = fresh
            .iter()
            .filter(|r| succeeded.contains(&r.external_id))
            .count();
        let failed = fresh.len() - delivered;

        tracing::info!(source, delivered, failed, "cycle finished");
        Ok(if failed == 0 {
            CycleOutcome::Collected { delivered }
        } else {
            CycleOutcome::PartialFailure { delivered, failed }
        })
    }

    /// Deliver `fresh` in sequential batches of `batch_size`. The first batch always
    /// goes out; later ones are left for the next cycle once shutdown is requested.
    /// The watermark moves after every batch that had confirmed ids.
    /// Returns the ids the downstream confirmed.
    pub async fn deliver_all(
        &self,
        source: &str,
        window: &CollectionWindow,
        records: &[NormalizedRecord],
        fresh: &[NormalizedRecord],
        shutdown: &ShutdownSignal,
    ) -> Result<HashSet<String>, CycleError> {
        let mut succeeded = HashSet::new();
        for (i, batch) in fresh.chunks(self.batch_size.max(1)).enumerate() {
            if i > 0 && shutdown.is_requested() {
                tracing::warn!(source, batch = i, "shutdown requested, leaving remaining batches");
                break;
            }
            let res = self.deliver.deliver(batch).await;
            if !res.failed_ids.is_empty() {
                tracing::warn!(source, batch = i, failed = res.failed_ids.len(), "batch partially failed");
            }
            if res.succeeded_ids.is_empty() {
                continue;
            }
            succeeded.extend(res.succeeded_ids);
            self.record_progress(source, window.since, records, fresh, &succeeded)
                .await?;
        }
        Ok(succeeded)
    }

    /// Persist what has been confirmed so far. Unsent and failed ids both count
    /// as pending and hold the position back.
    async fn record_progress(
        &self,
        source: &str,
        since: DateTime<Utc>,
        records: &[NormalizedRecord],
        fresh: &[NormalizedRecord],
        succeeded: &HashSet<String>,
    ) -> Result<(), CycleError> {
        let (done, pending): (Vec<&NormalizedRecord>, Vec<&NormalizedRecord>) =
            fresh.iter().partition(|r| succeeded.contains(&r.external_id));
        let confirmed: Vec<(String, DateTime<Utc>)> = done
            .iter()
            .map(|r| (r.external_id.clone(), r.occurred_at))
            .collect();
        let pending: HashSet<&str> = pending.iter().map(|r| r.external_id.as_str()).collect();

        let up_to = contiguous_high_water(records, &pending).unwrap_or(since);
        let wm = self
            .tracker
            .advance(source, up_to, &confirmed)
            .await
            .map_err(CycleError::Store)?;
        if let Some(pos) = wm.position {
            gauge!("watermark_position_ts", "source" => source.to_string()).set(pos.timestamp() as f64);
        }
        Ok(())
    }
}

/// Latest `occurred_at` such that every record of the window at or before it
/// is delivered, i.e. strictly earlier than the first still-pending record.
fn contiguous_high_water(
    records: &[NormalizedRecord],
    pending: &HashSet<&str>,
) -> Option<DateTime<Utc>> {
    let first_gap = records
        .iter()
        .filter(|r| pending.contains(r.external_id.as_str()))
        .map(|r| r.occurred_at)
        .min();
    records
        .iter()
        .map(|r| r.occurred_at)
        .filter(|at| first_gap.map_or(true, |gap| *at < gap))
        .max()
}
