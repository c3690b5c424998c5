//! Worker directory entity models and DTOs.

use serde::Serialize;
use sqlx::FromRow;

use factory_core::plan::{WorkerSnapshot, WorkerState};
use factory_core::types::{DbId, TimestampMs};

use crate::models::status::{StatusId, WorkerStatus};

/// A row from the `workers` table. Rows are retained after shutdown.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Worker {
    pub id: DbId,
    pub worker_id: String,
    pub provider: String,
    pub machine_app: Option<String>,
    pub machine_id: Option<String>,
    pub machine_region: Option<String>,
    pub status_id: StatusId,
    pub load: i32,
    pub heartbeat_at: TimestampMs,
    pub last_claim_at: Option<TimestampMs>,
    pub scheduled_shutdown_at: Option<TimestampMs>,
    pub stopped_at: Option<TimestampMs>,
    pub created_at: TimestampMs,
}

impl Worker {
    /// Project this row into the planner's snapshot type.
    pub fn to_snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: self.worker_id.clone(),
            state: if self.status_id == WorkerStatus::Active.id() {
                WorkerState::Active
            } else {
                WorkerState::Stopped
            },
            load: self.load,
            heartbeat_at: self.heartbeat_at,
            last_claim_at: self.last_claim_at,
            scheduled_shutdown_at: self.scheduled_shutdown_at,
            machine_id: self.machine_id.clone(),
            app_name: self.machine_app.clone(),
            region: self.machine_region.clone(),
        }
    }
}

/// Full-state upsert applied by the reconciler after a spawn, drain, or
/// drift-healing decision.
#[derive(Debug, Clone)]
pub struct UpsertWorkerState {
    pub worker_id: String,
    pub provider: String,
    pub status: WorkerStatus,
    pub load: i32,
    pub scheduled_shutdown_at: Option<TimestampMs>,
    pub machine_app: Option<String>,
    pub machine_id: Option<String>,
    pub machine_region: Option<String>,
}

/// One worker entry in the fleet statistics read path.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkerStatsEntry {
    pub worker_id: String,
    pub status_id: StatusId,
    pub load: i32,
    pub heartbeat_at: TimestampMs,
    pub machine_id: Option<String>,
    pub machine_app: Option<String>,
}

/// Aggregate fleet statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub active_count: i64,
    pub idle_count: i64,
    pub workers: Vec<WorkerStatsEntry>,
}
