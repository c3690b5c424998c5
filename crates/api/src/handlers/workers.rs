//! Handlers for fleet visibility and on-demand reconciliation.

use axum::extract::State;
use axum::Json;

use factory_db::models::worker::WorkerStats;
use factory_queue::{ReconcileOutcome, ReconcileOverrides};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /workers/stats
// ---------------------------------------------------------------------------

/// Fleet statistics: active/idle counts plus per-worker rows.
pub async fn fleet_stats(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<WorkerStats>>> {
    let stats = state.engine.worker_stats().await?;
    Ok(Json(DataResponse { data: stats }))
}

// ---------------------------------------------------------------------------
// POST /workers/reconcile
// ---------------------------------------------------------------------------

/// Run one reconcile pass synchronously and return its outcome.
///
/// The periodic background loop makes this unnecessary in steady state;
/// it exists for operators and deploy hooks that want the fleet converged
/// right now. The optional body overrides the scaling policy and provider
/// config for this pass only.
pub async fn reconcile(
    State(state): State<AppState>,
    body: Option<Json<ReconcileOverrides>>,
) -> AppResult<Json<DataResponse<ReconcileOutcome>>> {
    let overrides = body.map(|Json(o)| o).unwrap_or_default();
    let outcome = state.reconciler.run_pass_with(overrides).await?;
    Ok(Json(DataResponse { data: outcome }))
}
