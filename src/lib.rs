// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod retry;
pub mod watermark;

pub use crate::api::router;
pub use crate::ingest::pipeline::{CycleOutcome, SkipReason, SourcePipeline};
pub use crate::ingest::scheduler::{Shutdown, ShutdownSignal, SourceRunner};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::PipelineConfig;
use crate::delivery::Deliver;
use crate::watermark::{WatermarkStore, WatermarkTracker};

/// Build one runner per enabled source, all sharing the store and the delivery client.
pub fn build_runners(
    cfg: &PipelineConfig,
    store: Arc<dyn WatermarkStore>,
    deliver: Arc<dyn Deliver>,
) -> Result<Vec<Arc<SourceRunner>>> {
    let tracker: Arc<WatermarkTracker<dyn WatermarkStore>> = Arc::new(WatermarkTracker::new(store));
    let provider_timeout = Duration::from_secs(cfg.provider_timeout_secs);

    cfg.enabled_sources()
        .map(|src| -> Result<Arc<SourceRunner>> {
            let collector = ingest::providers::build_collector(src, cfg.retry, provider_timeout)?;
            let pipeline = SourcePipeline {
                source: collector,
                tracker: tracker.clone(),
                deliver: deliver.clone(),
                lookback_days: src.lookback_days,
                batch_size: cfg.downstream.batch_size,
            };
            tracing::info!(
                source = %src.name,
                kind = ?src.kind,
                interval_secs = src.interval_secs,
                lookback_days = src.lookback_days,
                "source configured"
            );
            Ok(Arc::new(SourceRunner::new(
                src.name.clone(),
                Duration::from_secs(src.interval_secs),
                pipeline,
            )))
        })
        .collect()
}
