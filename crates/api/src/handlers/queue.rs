//! Handlers for the message-queue lifecycle.
//!
//! Provides:
//! - Producer endpoint for enqueueing messages.
//! - Worker endpoints for claim, heartbeat, complete, and fail.
//! - Operator endpoints for stats, listings, and the stuck-lease sweep.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use factory_core::queue::FailureOutcome;
use factory_core::types::{DbId, TimestampMs};
use factory_db::models::message::{ClaimedJob, EnqueueMessage, MessageSummary, QueueStats};
use factory_db::models::status::MessageStatus;
use factory_db::models::worker::WorkerStats;
use factory_queue::SweepOutcome;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request/response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: String,
}

/// Lease-scoped request body shared by heartbeat and complete.
#[derive(Debug, Deserialize)]
pub struct LeaseRequest {
    pub worker_id: String,
    pub lease_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub worker_id: String,
    pub lease_id: Uuid,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    /// False when the caller no longer owns the lease; the worker must
    /// abandon the message.
    pub renewed: bool,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub completed: bool,
}

#[derive(Debug, Serialize)]
pub struct FailResponse {
    /// False when the caller no longer owns the lease.
    pub acknowledged: bool,
    /// Resulting message status: `queued` or `dead_letter`.
    pub status: Option<&'static str>,
    pub attempts: Option<i32>,
    pub retry_at: Option<TimestampMs>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub queue: QueueStats,
    pub workers: WorkerStats,
}

#[derive(Debug, Deserialize)]
pub struct SweepQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// POST /queue/messages
// ---------------------------------------------------------------------------

/// Enqueue a message for an agent conversation.
pub async fn enqueue(
    State(state): State<AppState>,
    Json(input): Json<EnqueueMessage>,
) -> AppResult<impl IntoResponse> {
    let message = state.engine.enqueue(&input).await?;

    // Wake the reconcile loop immediately; the durable nudge scheduled by
    // the engine covers the case where this process dies first.
    state.reconcile_nudge.notify_one();

    Ok((StatusCode::CREATED, Json(DataResponse { data: message })))
}

// ---------------------------------------------------------------------------
// POST /queue/claim
// ---------------------------------------------------------------------------

/// Claim the next eligible message for a worker.
///
/// Responds with `data: null` when nothing is eligible.
pub async fn claim(
    State(state): State<AppState>,
    Json(input): Json<ClaimRequest>,
) -> AppResult<Json<DataResponse<Option<ClaimedJob>>>> {
    if input.worker_id.trim().is_empty() {
        return Err(AppError::BadRequest("worker_id must not be empty".into()));
    }
    let job = state.engine.claim(&input.worker_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// POST /queue/messages/{id}/heartbeat
// ---------------------------------------------------------------------------

/// Renew a claim's lease and the conversation lock.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(message_id): Path<DbId>,
    Json(input): Json<LeaseRequest>,
) -> AppResult<Json<DataResponse<HeartbeatResponse>>> {
    let renewed = state
        .engine
        .heartbeat(&input.worker_id, message_id, input.lease_id)
        .await?;
    Ok(Json(DataResponse {
        data: HeartbeatResponse { renewed },
    }))
}

// ---------------------------------------------------------------------------
// POST /queue/messages/{id}/complete
// ---------------------------------------------------------------------------

/// Mark an owned message done, releasing the conversation and worker load.
pub async fn complete(
    State(state): State<AppState>,
    Path(message_id): Path<DbId>,
    Json(input): Json<LeaseRequest>,
) -> AppResult<Json<DataResponse<CompleteResponse>>> {
    let completed = state
        .engine
        .complete(&input.worker_id, message_id, input.lease_id)
        .await?;
    Ok(Json(DataResponse {
        data: CompleteResponse { completed },
    }))
}

// ---------------------------------------------------------------------------
// POST /queue/messages/{id}/fail
// ---------------------------------------------------------------------------

/// Record a failed attempt; the message is requeued with backoff or
/// dead-lettered once its attempts are exhausted.
pub async fn fail(
    State(state): State<AppState>,
    Path(message_id): Path<DbId>,
    Json(input): Json<FailRequest>,
) -> AppResult<Json<DataResponse<FailResponse>>> {
    let outcome = state
        .engine
        .fail(&input.worker_id, message_id, input.lease_id, &input.error)
        .await?;

    let data = match outcome {
        Some(FailureOutcome::Requeue {
            attempts,
            scheduled_for,
        }) => FailResponse {
            acknowledged: true,
            status: Some(MessageStatus::Queued.name()),
            attempts: Some(attempts),
            retry_at: Some(scheduled_for),
        },
        Some(FailureOutcome::DeadLetter { attempts, .. }) => FailResponse {
            acknowledged: true,
            status: Some(MessageStatus::DeadLetter.name()),
            attempts: Some(attempts),
            retry_at: None,
        },
        None => FailResponse {
            acknowledged: false,
            status: None,
            attempts: None,
            retry_at: None,
        },
    };
    Ok(Json(DataResponse { data }))
}

// ---------------------------------------------------------------------------
// GET /queue/stats
// ---------------------------------------------------------------------------

/// Queue and fleet counters.
pub async fn stats(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<StatsResponse>>> {
    let queue = state.engine.queue_stats().await?;
    let workers = state.engine.worker_stats().await?;
    Ok(Json(DataResponse {
        data: StatsResponse { queue, workers },
    }))
}

// ---------------------------------------------------------------------------
// GET /queue/messages
// ---------------------------------------------------------------------------

/// List messages in a given status (default: `dead_letter`).
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<DataResponse<Vec<MessageSummary>>>> {
    let status_name = query.status.as_deref().unwrap_or("dead_letter");
    let status = MessageStatus::from_name(status_name)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown message status '{status_name}'")))?;

    let messages = state
        .engine
        .list_by_status(status, query.limit, query.offset)
        .await?;
    Ok(Json(DataResponse { data: messages }))
}

// ---------------------------------------------------------------------------
// POST /queue/sweep
// ---------------------------------------------------------------------------

/// Revert processing messages with expired leases back to queued.
///
/// The background sweep runs this on an interval; the endpoint exists so
/// operators can force a pass, optionally with a `limit` on the batch.
pub async fn sweep(
    State(state): State<AppState>,
    Query(query): Query<SweepQuery>,
) -> AppResult<Json<DataResponse<SweepOutcome>>> {
    let outcome = state.engine.release_stuck(query.limit).await?;
    Ok(Json(DataResponse { data: outcome }))
}
