//! Status-report ingress.

use axum::{extract::State, Json};
use tracing::debug;

use crate::api::{error::ApiResult, state::ApiState};
use crate::{PollerReport, ReportResponse};

/// POST /api/report
///
/// Accepts one rolled-up status report from a poller and feeds it to the
/// state machine. Unknown pollers are acknowledged without effect.
pub async fn report_status(
    State(state): State<ApiState>,
    Json(report): Json<PollerReport>,
) -> ApiResult<Json<ReportResponse>> {
    let started = std::time::Instant::now();
    let poller_id = report.poller_id.clone();

    state.engine.handle_report(&report).await?;

    debug!(
        "processed report from {} in {:?}",
        poller_id,
        started.elapsed()
    );

    Ok(Json(ReportResponse { received: true }))
}
