// src/api.rs
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::error::CycleError;
use crate::ingest::scheduler::{ShutdownSignal, SourceRunner};

#[derive(Clone)]
pub struct AppState {
    runners: Arc<Vec<Arc<SourceRunner>>>,
    shutdown: ShutdownSignal,
}

impl AppState {
    pub fn new(runners: Vec<Arc<SourceRunner>>, shutdown: ShutdownSignal) -> Self {
        Self {
            runners: Arc::new(runners),
            shutdown,
        }
    }

    pub fn runner(&self, name: &str) -> Option<&Arc<SourceRunner>> {
        self.runners.iter().find(|r| r.name() == name)
    }
}

/// `GET /health`, `GET /sources` and one `POST /<source>-collect` per runner.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sources", get(list_sources));

    for runner in state.runners.iter() {
        let runner = runner.clone();
        let path = format!("/{}-collect", runner.name());
        app = app.route(
            &path,
            post(move |State(st): State<AppState>| {
                let runner = runner.clone();
                async move { collect_now(&runner, &st.shutdown).await }
            }),
        );
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn collect_now(runner: &Arc<SourceRunner>, shutdown: &ShutdownSignal) -> Response {
    match runner.trigger(shutdown).await {
        Ok(outcome) => {
            tracing::info!(source = %runner.name(), outcome = outcome.label(), "on-demand cycle");
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(e) => {
            let status = match &e {
                CycleError::Upstream(_) => StatusCode::BAD_GATEWAY,
                CycleError::Store(_) | CycleError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::error!(source = %runner.name(), error = %e, "on-demand cycle failed");
            (
                status,
                Json(json!({ "outcome": "failed", "source": runner.name(), "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceInfo {
    name: String,
    interval_secs: u64,
    running: bool,
    watermark: Option<chrono::DateTime<chrono::Utc>>,
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceInfo>> {
    let mut out = Vec::with_capacity(state.runners.len());
    for r in state.runners.iter() {
        let watermark = match r.pipeline().tracker.current(r.pipeline().source_id()).await {
            Ok(wm) => wm.position,
            Err(e) => {
                tracing::warn!(source = %r.name(), error = %e, "watermark unreadable");
                None
            }
        };
        out.push(SourceInfo {
            name: r.name().to_string(),
            interval_secs: r.interval().as_secs(),
            running: r.is_running(),
            watermark,
        });
    }
    Json(out)
}
