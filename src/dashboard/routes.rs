//! Status API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::executor::{DailyStats, OrderRecord};
use crate::engine::heartbeat::{Heartbeat, HeartbeatStatus, Opportunity, TickSummary};

/// Upper bound on `?limit=` for list endpoints.
const MAX_LIMIT: usize = 1000;
const DEFAULT_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub agent_name: String,
    pub heartbeat: Arc<Heartbeat>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(agent_name: impl Into<String>, heartbeat: Arc<Heartbeat>) -> Self {
        Self {
            agent_name: agent_name.into(),
            heartbeat,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

impl LimitParams {
    fn resolve(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub agent: String,
    pub uptime_secs: i64,
    pub dry_run: bool,
    pub heartbeat: HeartbeatStatus,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        agent: state.agent_name.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        dry_run: state.heartbeat.executor().is_dry_run(),
        heartbeat: state.heartbeat.status(),
    })
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<DailyStats> {
    Json(state.heartbeat.executor().daily_stats())
}

/// GET /api/history?limit=N, newest first.
pub async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<OrderRecord>> {
    Json(state.heartbeat.executor().order_history(params.resolve()))
}

/// GET /api/opportunities, from the latest tick.
pub async fn get_opportunities(State(state): State<AppState>) -> Json<Vec<Opportunity>> {
    Json(state.heartbeat.last_opportunities())
}

/// GET /api/ticks?limit=N, newest first.
pub async fn get_ticks(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<TickSummary>> {
    Json(state.heartbeat.recent_ticks(params.resolve()))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
