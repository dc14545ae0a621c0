//! HTTP request handlers

use std::sync::Arc;
use axum::{
    extract::State,
    response::Html,
    Json,
};
use tracing::info;

use crate::monitoring::{AlertRecord, CycleStatsSnapshot};
use crate::report::{ArtifactReader, ArtifactStatus, VerdictArtifact};
use crate::scheduler::{CycleReport, Trigger};

use super::error::{Result, ServerError};
use super::state::AppState;

// ============================================================================
// System
// ============================================================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = chrono::Utc::now().signed_duration_since(state.started_at);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime.num_seconds(),
        "cycle_running": state.scheduler.is_running(),
    }))
}

// ============================================================================
// Verdict
// ============================================================================

/// Run a file read against the published artifacts on the blocking pool
async fn read_artifacts<T, F>(state: &AppState, read: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&ArtifactReader) -> crate::Result<T> + Send + 'static,
{
    let reader = state.reader.clone();
    let result = tokio::task::spawn_blocking(move || read(&reader))
        .await
        .map_err(|e| ServerError::Internal(format!("artifact read task failed: {}", e)))?;
    Ok(result?)
}

/// Latest published verdict
pub async fn get_verdict(State(state): State<Arc<AppState>>) -> Result<Json<VerdictArtifact>> {
    read_artifacts(&state, |reader| reader.latest())
        .await?
        .map(Json)
        .ok_or_else(|| ServerError::NotFound("No verdict has been published yet".to_string()))
}

/// Missing, fresh or stale, judged by the artifact's own timestamp
pub async fn get_verdict_status(State(state): State<Arc<AppState>>) -> Result<Json<ArtifactStatus>> {
    let stale_after = state.stale_after;
    let status = read_artifacts(&state, move |reader| reader.status(chrono::Utc::now(), stale_after)).await?;
    Ok(Json(status))
}

/// Narrative HTML report
pub async fn get_report(State(state): State<Arc<AppState>>) -> Result<Html<String>> {
    read_artifacts(&state, |reader| reader.html())
        .await?
        .map(Html)
        .ok_or_else(|| ServerError::NotFound("No report has been published yet".to_string()))
}

// ============================================================================
// Cycles
// ============================================================================

/// Run a cycle now; waits behind a cycle already in flight.
/// The cycle completes even if the client disconnects.
pub async fn trigger_cycle(State(state): State<Arc<AppState>>) -> Result<Json<CycleReport>> {
    info!("Manual cycle requested");
    let report = state.scheduler.trigger_detached(Trigger::Manual).await?;
    Ok(Json(report))
}

pub async fn get_cycle_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats: CycleStatsSnapshot = state.scheduler.stats();
    Json(serde_json::json!({
        "stats": stats,
        "last_cycle": state.scheduler.last_report(),
    }))
}

pub async fn get_alerts(State(state): State<Arc<AppState>>) -> Json<Vec<AlertRecord>> {
    Json(state.scheduler.alert_history())
}
