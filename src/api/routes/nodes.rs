//! Node read endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::{error::ApiResult, state::ApiState};
use crate::metrics::MetricPoint;
use crate::store::sqlite::HISTORY_LIMIT;
use crate::store::NodeHistoryRow;
use crate::{NodeSnapshot, ServiceSnapshot};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

/// GET /api/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> ApiResult<Json<Vec<NodeSnapshot>>> {
    let rows = state.store.get_nodes().await?;

    let mut nodes = Vec::with_capacity(rows.len());
    for row in rows {
        // A live snapshot exists once the node reported this process
        // lifetime; otherwise serve what the store knows
        match state.snapshots.get(&row.node_id).await {
            Some(snapshot) => nodes.push(snapshot),
            None => nodes.push(snapshot_from_store(&state, &row.node_id).await?),
        }
    }

    Ok(Json(nodes))
}

/// GET /api/nodes/:id
pub async fn get_node(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<NodeSnapshot>> {
    // 404 for unknown ids regardless of snapshot presence
    state.store.get_node(&node_id).await?;

    match state.snapshots.get(&node_id).await {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Ok(Json(snapshot_from_store(&state, &node_id).await?)),
    }
}

/// GET /api/nodes/:id/history
pub async fn get_node_history(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<NodeHistoryRow>>> {
    state.store.get_node(&node_id).await?;

    let limit = query.limit.unwrap_or(HISTORY_LIMIT);
    let history = state.store.get_node_history(&node_id, limit).await?;

    Ok(Json(history))
}

/// GET /api/nodes/:id/metrics
pub async fn get_node_metrics(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Vec<MetricPoint>>> {
    state.store.get_node(&node_id).await?;

    Ok(Json(state.metrics.get_metrics(&node_id)))
}

/// GET /api/nodes/:id/services
pub async fn list_node_services(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Vec<ServiceSnapshot>>> {
    state.store.get_node(&node_id).await?;

    let statuses = state.store.get_latest_service_statuses(&node_id).await?;

    Ok(Json(
        statuses.into_iter().map(service_snapshot).collect(),
    ))
}

/// GET /api/nodes/:id/services/:name
pub async fn get_node_service(
    State(state): State<ApiState>,
    Path((node_id, service_name)): Path<(String, String)>,
) -> ApiResult<Json<ServiceSnapshot>> {
    let status = state
        .store
        .get_service_status(&node_id, &service_name)
        .await?;

    Ok(Json(service_snapshot(status)))
}

async fn snapshot_from_store(state: &ApiState, node_id: &str) -> ApiResult<NodeSnapshot> {
    let row = state.store.get_node(node_id).await?;
    let services = state
        .store
        .get_latest_service_statuses(node_id)
        .await?
        .into_iter()
        .map(service_snapshot)
        .collect();

    Ok(NodeSnapshot {
        node_id: row.node_id,
        is_healthy: row.is_healthy,
        first_seen: Some(row.first_seen),
        last_seen: row.last_seen,
        services,
    })
}

fn service_snapshot(status: crate::store::ServiceStatusRow) -> ServiceSnapshot {
    ServiceSnapshot {
        service_name: status.service_name,
        service_type: status.service_type,
        available: status.available,
        details: serde_json::from_str(&status.details).ok(),
        timestamp: status.timestamp,
    }
}
