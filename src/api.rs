//! HTTP control surface: counters and on-demand reloads.

use crate::engine::ReloadTrigger;
use crate::stats::StatsCollector;
use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, routing::post, Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Reload triggers of every filter stage. The handles themselves stay with `main`.
pub type Reloaders = Arc<[ReloadTrigger]>;

struct ApiState {
    stats: Arc<StatsCollector>,
    reloaders: Reloaders,
}

pub fn router(stats: Arc<StatsCollector>, reloaders: Reloaders) -> Router {
    let state = Arc::new(ApiState { stats, reloaders });

    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/reload", post(trigger_reload))
        .with_state(state)
}

pub async fn start_api_server(listener: TcpListener, app: Router) -> Result<()> {
    tracing::info!("API Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_stats(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

async fn trigger_reload(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let mut triggered = 0;
    for trigger in state.reloaders.iter() {
        if trigger.reload_now().await {
            triggered += 1;
        }
    }
    Json(serde_json::json!({ "status": "reload_triggered", "stages": triggered }))
}
