//! Repository for the `workers` table.
//!
//! The directory is advisory: rows describe what the control plane believes
//! about the fleet, and the reconciler heals it against the provider's
//! live list.

use sqlx::PgExecutor;

use factory_core::types::TimestampMs;

use crate::models::status::WorkerStatus;
use crate::models::worker::{UpsertWorkerState, Worker, WorkerStats, WorkerStatsEntry};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "\
    id, worker_id, provider, machine_app, machine_id, machine_region, \
    status_id, load, heartbeat_at, last_claim_at, scheduled_shutdown_at, \
    stopped_at, created_at";

/// Provides state transitions for the worker directory.
pub struct WorkerRepo;

impl WorkerRepo {
    /// Record a successful claim: upsert the worker as active, bump its
    /// load, refresh heartbeat and last-claim markers, and cancel any
    /// pending idle shutdown.
    pub async fn record_claim(
        executor: impl PgExecutor<'_>,
        worker_id: &str,
        provider: &str,
        now: TimestampMs,
    ) -> Result<Worker, sqlx::Error> {
        let query = format!(
            "INSERT INTO workers \
                 (worker_id, provider, status_id, load, heartbeat_at, last_claim_at, created_at) \
             VALUES ($1, $2, $3, 1, $4, $4, $4) \
             ON CONFLICT (worker_id) DO UPDATE SET \
                 status_id = $3, \
                 load = workers.load + 1, \
                 heartbeat_at = $4, \
                 last_claim_at = $4, \
                 scheduled_shutdown_at = NULL, \
                 stopped_at = NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(worker_id)
            .bind(provider)
            .bind(WorkerStatus::Active.id())
            .bind(now)
            .fetch_one(executor)
            .await
    }

    /// Refresh a worker's heartbeat. Returns `false` for unknown workers.
    pub async fn touch_heartbeat(
        executor: impl PgExecutor<'_>,
        worker_id: &str,
        now: TimestampMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE workers SET heartbeat_at = $2 WHERE worker_id = $1")
            .bind(worker_id)
            .bind(now)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch a worker row-locked for a load-release transition.
    pub async fn find_for_update(
        executor: impl PgExecutor<'_>,
        worker_id: &str,
    ) -> Result<Option<Worker>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers WHERE worker_id = $1 FOR UPDATE");
        sqlx::query_as::<_, Worker>(&query)
            .bind(worker_id)
            .fetch_optional(executor)
            .await
    }

    /// Apply a computed load release: new load and, when the worker went
    /// idle, its armed shutdown deadline.
    pub async fn apply_load_release(
        executor: impl PgExecutor<'_>,
        worker_id: &str,
        load_after: i32,
        scheduled_shutdown_at: Option<TimestampMs>,
        now: TimestampMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE workers \
             SET load = $2, scheduled_shutdown_at = $3, heartbeat_at = $4 \
             WHERE worker_id = $1",
        )
        .bind(worker_id)
        .bind(load_after)
        .bind(scheduled_shutdown_at)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Full-state upsert used by the reconciler after spawn, drain, and
    /// drift-healing decisions.
    pub async fn upsert_state(
        executor: impl PgExecutor<'_>,
        input: &UpsertWorkerState,
        now: TimestampMs,
    ) -> Result<Worker, sqlx::Error> {
        let stopped_at = match input.status {
            WorkerStatus::Stopped => Some(now),
            WorkerStatus::Active => None,
        };
        let query = format!(
            "INSERT INTO workers \
                 (worker_id, provider, machine_app, machine_id, machine_region, \
                  status_id, load, heartbeat_at, scheduled_shutdown_at, stopped_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $8) \
             ON CONFLICT (worker_id) DO UPDATE SET \
                 provider = EXCLUDED.provider, \
                 machine_app = EXCLUDED.machine_app, \
                 machine_id = EXCLUDED.machine_id, \
                 machine_region = EXCLUDED.machine_region, \
                 status_id = EXCLUDED.status_id, \
                 load = EXCLUDED.load, \
                 heartbeat_at = EXCLUDED.heartbeat_at, \
                 scheduled_shutdown_at = EXCLUDED.scheduled_shutdown_at, \
                 stopped_at = EXCLUDED.stopped_at \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(&input.worker_id)
            .bind(&input.provider)
            .bind(&input.machine_app)
            .bind(&input.machine_id)
            .bind(&input.machine_region)
            .bind(input.status.id())
            .bind(input.load)
            .bind(now)
            .bind(input.scheduled_shutdown_at)
            .bind(stopped_at)
            .fetch_one(executor)
            .await
    }

    /// List all worker rows, active first, then by most recent heartbeat.
    pub async fn list(executor: impl PgExecutor<'_>) -> Result<Vec<Worker>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workers ORDER BY status_id ASC, heartbeat_at DESC"
        );
        sqlx::query_as::<_, Worker>(&query).fetch_all(executor).await
    }

    /// List only active worker rows.
    pub async fn list_active(executor: impl PgExecutor<'_>) -> Result<Vec<Worker>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workers WHERE status_id = $1 ORDER BY heartbeat_at DESC"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(WorkerStatus::Active.id())
            .fetch_all(executor)
            .await
    }

    /// Fleet statistics: per-worker entries for active workers plus
    /// aggregate counts.
    pub async fn stats(pool: &sqlx::PgPool) -> Result<WorkerStats, sqlx::Error> {
        let workers = sqlx::query_as::<_, WorkerStatsEntry>(
            "SELECT worker_id, status_id, load, heartbeat_at, machine_id, machine_app \
             FROM workers WHERE status_id = $1 \
             ORDER BY worker_id ASC",
        )
        .bind(WorkerStatus::Active.id())
        .fetch_all(pool)
        .await?;

        let active_count = workers.len() as i64;
        let idle_count = workers.iter().filter(|w| w.load == 0).count() as i64;

        Ok(WorkerStats {
            active_count,
            idle_count,
            workers,
        })
    }
}
