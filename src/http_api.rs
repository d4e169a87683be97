use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    activity::{LogEntry, LogFilter, RecentActivity},
    counters::CounterSet,
    display::render_entries,
    errors::{IoOperation, TelemetryError},
    statistics::Statistics,
};

#[derive(Clone)]
pub struct ApiState {
    pub statistics: Arc<Statistics>,
    pub activity: Arc<RecentActivity>,
    pub display_limit: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    total_requests: u64,
    blocked_requests: u64,
    allowed_requests: u64,
    redirected_requests: u64,
    block_percentage: f64,
}

impl From<CounterSet> for StatsResponse {
    fn from(set: CounterSet) -> Self {
        Self {
            total_requests: set.total,
            blocked_requests: set.blocked,
            allowed_requests: set.allowed,
            redirected_requests: set.redirected,
            block_percentage: set.block_percentage(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    #[serde(default)]
    filter: LogFilter,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ActivityResponse {
    entries: Vec<LogEntry>,
    rendered: String,
}

#[derive(Debug, Deserialize)]
struct ResetQuery {
    /// Also clear recent activity
    #[serde(default)]
    activity: bool,
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn stats_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let response = StatsResponse::from(state.statistics.snapshot());
    (StatusCode::OK, Json(response))
}

async fn reset_handler(
    State(state): State<ApiState>,
    Query(query): Query<ResetQuery>,
) -> impl IntoResponse {
    // reset writes through to storage
    let statistics = Arc::clone(&state.statistics);
    let zeroed = match tokio::task::spawn_blocking(move || statistics.reset()).await {
        Ok(zeroed) => zeroed,
        Err(e) => {
            error!("Statistics reset task failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if query.activity {
        state.activity.clear();
    }

    (StatusCode::OK, Json(StatsResponse::from(zeroed))).into_response()
}

async fn activity_handler(
    State(state): State<ApiState>,
    Query(query): Query<ActivityQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(state.display_limit);
    let entries = state.activity.query(query.filter, limit);
    let rendered = render_entries(&entries);

    (StatusCode::OK, Json(ActivityResponse { entries, rendered }))
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/stats/reset", post(reset_handler))
        .route("/activity", get(activity_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_http_server(
    address: String,
    port: u16,
    state: ApiState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), TelemetryError> {
    let app = router(state);

    let addr = format!("{}:{}", address, port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        TelemetryError::io(
            IoOperation::Listen,
            format!("Failed to bind HTTP API to {}", addr),
            e,
        )
    })?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("HTTP server shutting down");
        })
        .await
        .map_err(|e| TelemetryError::io(IoOperation::Listen, "HTTP server failed", e))?;

    Ok(())
}
