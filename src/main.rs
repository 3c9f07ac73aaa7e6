//! Collector service entrypoint.
//! Drains in-flight cycles on SIGINT/SIGTERM before exiting.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use market_collector::{
    api::{self, AppState},
    build_runners,
    config::load_config_default,
    delivery::{Deliver, DeliveryClient},
    ingest::scheduler::spawn_all,
    metrics::Metrics,
    watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkStore},
    Shutdown,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON lines when LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_collector=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = load_config_default().context("loading collector config")?;
    let metrics = Metrics::init()?;

    let store: Arc<dyn WatermarkStore> = match &cfg.watermark_path {
        Some(p) => {
            tracing::info!(path = %p.display(), "file watermark store");
            Arc::new(FileWatermarkStore::new(p))
        }
        None => {
            tracing::warn!("in-memory watermark store; progress is lost on restart");
            Arc::new(MemoryWatermarkStore::new())
        }
    };
    let deliver: Arc<dyn Deliver> = Arc::new(DeliveryClient::new(
        &cfg.downstream.base_url,
        &cfg.downstream.api_key,
        Duration::from_secs(cfg.downstream.timeout_secs),
        cfg.retry,
    )?);

    let runners = build_runners(&cfg, store, deliver)?;
    let shutdown = Arc::new(Shutdown::new());

    let timers = if cfg.scheduler_enabled {
        spawn_all(&runners, &shutdown)
    } else {
        tracing::info!("timer-driven collection disabled (SCHEDULER_ENABLED=false)");
        Vec::new()
    };

    let app = api::router(AppState::new(runners, shutdown.signal())).merge(metrics.router::<()>());
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "listening");

    let sd = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            tracing::info!("shutdown requested, finishing in-flight batches");
            sd.trigger();
        })
        .await
        .context("http server")?;

    shutdown.trigger();
    for t in timers {
        if let Err(e) = t.await {
            tracing::warn!(error = %e, "timer task ended abnormally");
        }
    }
    tracing::info!("bye");
    Ok(())
}
