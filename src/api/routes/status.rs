//! System totals endpoint.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::{error::ApiResult, state::ApiState};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub unhealthy_nodes: usize,
    pub never_reported: usize,
    pub metric_nodes: i64,
    pub timestamp: DateTime<Utc>,
}

/// GET /api/status
pub async fn get_status(State(state): State<ApiState>) -> ApiResult<Json<StatusResponse>> {
    let nodes = state.store.get_nodes().await?;

    let total_nodes = nodes.len();
    let healthy_nodes = nodes.iter().filter(|n| n.is_healthy).count();
    let never_reported = nodes.iter().filter(|n| n.last_seen.is_none()).count();

    Ok(Json(StatusResponse {
        total_nodes,
        healthy_nodes,
        unhealthy_nodes: total_nodes - healthy_nodes,
        never_reported,
        metric_nodes: state.metrics.get_active_nodes(),
        timestamp: Utc::now(),
    }))
}
