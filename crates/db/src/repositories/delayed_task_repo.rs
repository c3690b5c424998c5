//! Repository for the `delayed_tasks` table.
//!
//! Delivery is at-least-once: the pump marks tasks complete as it claims
//! them, so a crash between claim and handling loses at most the nudge
//! (the next periodic pass covers it).

use sqlx::PgExecutor;

use factory_core::types::TimestampMs;

use crate::models::delayed_task::{DelayedTask, TaskKind};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, kind, run_at, worker_id, completed_at, created_at";

/// Provides scheduling and claiming of durable deferred tasks.
pub struct DelayedTaskRepo;

impl DelayedTaskRepo {
    /// Schedule a task to run at the given time.
    pub async fn schedule(
        executor: impl PgExecutor<'_>,
        kind: TaskKind,
        run_at: TimestampMs,
        worker_id: Option<&str>,
        now: TimestampMs,
    ) -> Result<DelayedTask, sqlx::Error> {
        let query = format!(
            "INSERT INTO delayed_tasks (kind, run_at, worker_id, created_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DelayedTask>(&query)
            .bind(kind.as_str())
            .bind(run_at)
            .bind(worker_id)
            .bind(now)
            .fetch_one(executor)
            .await
    }

    /// Claim a batch of due tasks, marking them complete. `SKIP LOCKED`
    /// keeps concurrent pumps from claiming the same task.
    pub async fn claim_due(
        executor: impl PgExecutor<'_>,
        now: TimestampMs,
        limit: i64,
    ) -> Result<Vec<DelayedTask>, sqlx::Error> {
        let query = format!(
            "UPDATE delayed_tasks SET completed_at = $1 \
             WHERE id IN ( \
                 SELECT id FROM delayed_tasks \
                 WHERE completed_at IS NULL AND run_at <= $1 \
                 ORDER BY run_at ASC \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DelayedTask>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(executor)
            .await
    }
}
