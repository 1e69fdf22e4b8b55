//! Management REST API.
//!
//! Read side: service health, scheduler status, lifetime stats, and the
//! rules file as it currently sits on disk. Write side: rule toggles
//! and edits (file-only, picked up at the next reload), explicit cache
//! reload, and an immediate batch run.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::{ConfigError, Error, SchedulerError};
use crate::rules::store::{RuleStore, RuleUpdate};
use crate::scheduler::Scheduler;
use crate::stats::ProcessingStats;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RuleStore>,
    pub scheduler: Arc<Scheduler>,
    pub stats: Arc<ProcessingStats>,
}

/// Build the management router.
pub fn management_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/stats", get(get_stats))
        .route("/api/rules", get(list_rules))
        .route("/api/rules/reload", post(reload_rules))
        .route("/api/rules/{id}/toggle", post(toggle_rule))
        .route("/api/rules/{id}", patch(update_rule))
        .route("/api/process", post(trigger_process))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

// ── Read endpoints ──────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mailpilot"
    }))
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.status().await)
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

/// GET /api/rules
///
/// Reads the file fresh, so edits pending a reload are visible here
/// before the pipeline sees them.
async fn list_rules(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.read_file().await {
        Ok(set) => Json(set).into_response(),
        Err(e) => config_error_response(e).into_response(),
    }
}

// ── Rule mutation ───────────────────────────────────────────────────

async fn reload_rules(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.reload().await {
        Ok(set) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "reloaded",
                "rules": set.rules.len()
            })),
        ),
        Err(e) => config_error_response(e),
    }
}

#[derive(Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

async fn toggle_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ToggleRequest>,
) -> impl IntoResponse {
    match state.store.set_rule_enabled(&id, body.enabled).await {
        Ok(rule) => (StatusCode::OK, Json(serde_json::json!(rule))),
        Err(e) => config_error_response(e),
    }
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RuleUpdate>,
) -> impl IntoResponse {
    match state.store.update_rule(&id, body).await {
        Ok(rule) => (StatusCode::OK, Json(serde_json::json!(rule))),
        Err(e) => config_error_response(e),
    }
}

// ── Batch trigger ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProcessRequest {
    limit: Option<usize>,
}

/// POST /api/process
///
/// Runs one batch right now. 409 when a run is already in flight.
async fn trigger_process(
    State(state): State<AppState>,
    body: Option<Json<ProcessRequest>>,
) -> impl IntoResponse {
    let limit = body.and_then(|Json(b)| b.limit);
    info!(limit = ?limit, "Manual batch run requested");

    match state.scheduler.run_now(limit).await {
        Ok(result) => (StatusCode::OK, Json(serde_json::json!(result))),
        Err(Error::Scheduler(SchedulerError::Busy)) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": "a batch run is already in progress"})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

// ── Error mapping ───────────────────────────────────────────────────

fn config_error_response(e: ConfigError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        ConfigError::RuleNotFound(_) => StatusCode::NOT_FOUND,
        ConfigError::DuplicateRuleId(_) | ConfigError::ParseError { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({"error": e.to_string()})))
}
