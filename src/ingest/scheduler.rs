// src/ingest/scheduler.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::CycleError;
use crate::ingest::pipeline::{CycleOutcome, SkipReason, SourcePipeline};

/// Sender half of the process shutdown flag.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal(self.tx.subscribe())
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver half; cheap to clone into every task.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// A signal that never fires (one-shot runs, tests).
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_requested(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn requested(&mut self) {
        let closed = self.0.wait_for(|v| *v).await.is_err();
        if closed {
            // sender dropped without triggering: never resolve
            std::future::pending::<()>().await;
        }
    }
}

/// Idle/Running state for one source, shared by the timer and on-demand paths.
pub struct SourceRunner {
    name: String,
    interval: Duration,
    pipeline: SourcePipeline,
    running: AtomicBool,
}

/// Resets the running flag on drop, also when the cycle task is aborted.
struct RunningGuard(Arc<SourceRunner>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

impl SourceRunner {
    pub fn new(name: impl Into<String>, interval: Duration, pipeline: SourcePipeline) -> Self {
        Self {
            name: name.into(),
            interval,
            pipeline,
            running: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn pipeline(&self) -> &SourcePipeline {
        &self.pipeline
    }

    fn try_acquire(self: &Arc<Self>) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(Arc::clone(self)))
    }

    /// Run one cycle now. Rejected immediately (not queued) when one is in flight.
    ///
    /// The cycle runs on its own task: dropping the returned future (a client
    /// hanging up on the on-demand route) leaves it running to completion.
    pub async fn trigger(self: &Arc<Self>, shutdown: &ShutdownSignal) -> Result<CycleOutcome, CycleError> {
        let Some(guard) = self.try_acquire() else {
            tracing::warn!(source = %self.name, "cycle already running, trigger rejected");
            counter!("cycle_rejected_total", "source" => self.name.clone()).increment(1);
            return Ok(CycleOutcome::skipped(SkipReason::AlreadyRunning));
        };
        let shutdown = shutdown.clone();
        let cycle = tokio::spawn(async move {
            let runner = &guard.0;
            runner.pipeline.run_cycle(chrono::Utc::now(), &shutdown).await
        });
        match cycle.await {
            Ok(res) => res,
            Err(e) => {
                tracing::error!(source = %self.name, error = %e, "cycle task did not complete");
                Err(CycleError::Aborted(e.to_string()))
            }
        }
    }
}

/// Timer loop for one source. The first tick fires immediately.
pub fn spawn_source_timer(runner: Arc<SourceRunner>, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(runner.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.requested() => break,
                _ = ticker.tick() => {}
            }

            let started = tokio::time::Instant::now();
            match runner.trigger(&shutdown).await {
                Ok(outcome) => tracing::info!(
                    target: "scheduler",
                    source = %runner.name(),
                    outcome = outcome.label(),
                    ?outcome,
                    "scheduled cycle"
                ),
                Err(e) => tracing::error!(
                    target: "scheduler",
                    source = %runner.name(),
                    error = %e,
                    "scheduled cycle failed"
                ),
            }
            if started.elapsed() > runner.interval() {
                tracing::warn!(
                    target: "scheduler",
                    source = %runner.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "cycle overran its interval, missed ticks skipped"
                );
            }
        }
        tracing::info!(target: "scheduler", source = %runner.name(), "timer stopped");
    })
}

/// Spawn one timer per runner; join the handles after triggering shutdown.
pub fn spawn_all(runners: &[Arc<SourceRunner>], shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
    runners
        .iter()
        .map(|r| spawn_source_timer(r.clone(), shutdown.signal()))
        .collect()
}
