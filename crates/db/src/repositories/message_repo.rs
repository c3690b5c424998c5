//! Repository for the `message_queue` table.
//!
//! Queue rows are append-only history: terminal transitions (`done`,
//! `dead_letter`) keep the row around for auditing. Methods that run inside
//! the claim/completion transactions take an executor so they compose with
//! `pool.begin()` at the call site.

use sqlx::PgExecutor;
use uuid::Uuid;

use factory_core::types::{DbId, TimestampMs};

use crate::models::message::{MessageSummary, QueueMessage, QueueStats};
use crate::models::status::{MessageStatus, StatusId};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "\
    id, conversation_id, agent_key, payload, status_id, priority, \
    scheduled_for, claimed_by, lease_id, lease_expires_at, \
    attempts, max_attempts, last_error, next_retry_at, dead_lettered_at, \
    created_at";

/// Maximum page size for message listing.
const MAX_LIMIT: i64 = 200;

/// Default page size for message listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides queue transitions for inbound messages.
pub struct MessageRepo;

impl MessageRepo {
    /// Insert a new queued message, returning the created row.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        executor: impl PgExecutor<'_>,
        conversation_id: &str,
        agent_key: &str,
        payload: &serde_json::Value,
        priority: i32,
        scheduled_for: TimestampMs,
        max_attempts: i32,
        now: TimestampMs,
    ) -> Result<QueueMessage, sqlx::Error> {
        let query = format!(
            "INSERT INTO message_queue \
                 (conversation_id, agent_key, payload, status_id, priority, \
                  scheduled_for, max_attempts, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueMessage>(&query)
            .bind(conversation_id)
            .bind(agent_key)
            .bind(payload)
            .bind(MessageStatus::Queued.id())
            .bind(priority)
            .bind(scheduled_for)
            .bind(max_attempts)
            .bind(now)
            .fetch_one(executor)
            .await
    }

    /// Fetch a batch of due queued messages, row-locked for the claim
    /// transaction. `SKIP LOCKED` keeps concurrent claimers from blocking
    /// on each other's candidates.
    pub async fn due_queued_for_claim(
        executor: impl PgExecutor<'_>,
        now: TimestampMs,
        limit: i64,
    ) -> Result<Vec<QueueMessage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM message_queue \
             WHERE status_id = $1 AND scheduled_for <= $2 \
             ORDER BY scheduled_for ASC, id ASC \
             LIMIT $3 \
             FOR UPDATE SKIP LOCKED"
        );
        sqlx::query_as::<_, QueueMessage>(&query)
            .bind(MessageStatus::Queued.id())
            .bind(now)
            .bind(limit)
            .fetch_all(executor)
            .await
    }

    /// Transition a claimed message to `processing` with its lease.
    pub async fn mark_processing(
        executor: impl PgExecutor<'_>,
        message_id: DbId,
        worker_id: &str,
        lease_id: Uuid,
        lease_expires_at: TimestampMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE message_queue \
             SET status_id = $2, claimed_by = $3, lease_id = $4, lease_expires_at = $5 \
             WHERE id = $1",
        )
        .bind(message_id)
        .bind(MessageStatus::Processing.id())
        .bind(worker_id)
        .bind(lease_id)
        .bind(lease_expires_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Extend the lease of a message still owned by the caller.
    ///
    /// Returns the conversation ID when the ownership check passed, `None`
    /// when the lease was already lost (expired sweep or double-claim).
    pub async fn extend_lease(
        executor: impl PgExecutor<'_>,
        message_id: DbId,
        worker_id: &str,
        lease_id: Uuid,
        new_expires_at: TimestampMs,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE message_queue \
             SET lease_expires_at = $4 \
             WHERE id = $1 AND status_id = $5 AND claimed_by = $2 AND lease_id = $3 \
             RETURNING conversation_id",
        )
        .bind(message_id)
        .bind(worker_id)
        .bind(lease_id)
        .bind(new_expires_at)
        .bind(MessageStatus::Processing.id())
        .fetch_optional(executor)
        .await?;
        Ok(row.map(|(conversation_id,)| conversation_id))
    }

    /// Fetch a message the caller claims to own, row-locked for a
    /// completion or failure transaction. Ownership means `processing`
    /// status with a matching lease and worker.
    pub async fn find_owned_for_update(
        executor: impl PgExecutor<'_>,
        message_id: DbId,
        worker_id: &str,
        lease_id: Uuid,
    ) -> Result<Option<QueueMessage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM message_queue \
             WHERE id = $1 AND status_id = $4 AND claimed_by = $2 AND lease_id = $3 \
             FOR UPDATE"
        );
        sqlx::query_as::<_, QueueMessage>(&query)
            .bind(message_id)
            .bind(worker_id)
            .bind(lease_id)
            .bind(MessageStatus::Processing.id())
            .fetch_optional(executor)
            .await
    }

    /// Transition an owned message to terminal `done`.
    pub async fn mark_done(
        executor: impl PgExecutor<'_>,
        message_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE message_queue \
             SET status_id = $2, claimed_by = NULL, lease_id = NULL, lease_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(message_id)
        .bind(MessageStatus::Done.id())
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Requeue a failed message for a delayed retry attempt.
    pub async fn requeue_for_retry(
        executor: impl PgExecutor<'_>,
        message_id: DbId,
        attempts: i32,
        next_retry_at: TimestampMs,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE message_queue \
             SET status_id = $2, attempts = $3, scheduled_for = $4, next_retry_at = $4, \
                 last_error = $5, claimed_by = NULL, lease_id = NULL, lease_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(message_id)
        .bind(MessageStatus::Queued.id())
        .bind(attempts)
        .bind(next_retry_at)
        .bind(error)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Transition a message that exhausted its attempts to `dead_letter`.
    pub async fn dead_letter(
        executor: impl PgExecutor<'_>,
        message_id: DbId,
        attempts: i32,
        dead_lettered_at: TimestampMs,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE message_queue \
             SET status_id = $2, attempts = $3, dead_lettered_at = $4, last_error = $5, \
                 claimed_by = NULL, lease_id = NULL, lease_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(message_id)
        .bind(MessageStatus::DeadLetter.id())
        .bind(attempts)
        .bind(dead_lettered_at)
        .bind(error)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Revert an expired-lease message to `queued`, immediately due. The
    /// attempt counter is untouched: the worker may have died before or
    /// after the work happened, and the retry budget is for real failures.
    pub async fn requeue_expired(
        executor: impl PgExecutor<'_>,
        message_id: DbId,
        now: TimestampMs,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE message_queue \
             SET status_id = $2, scheduled_for = $3, last_error = $4, \
                 claimed_by = NULL, lease_id = NULL, lease_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(message_id)
        .bind(MessageStatus::Queued.id())
        .bind(now)
        .bind(error)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Fetch a batch of processing messages whose lease has expired,
    /// row-locked for the sweep transaction.
    pub async fn expired_processing(
        executor: impl PgExecutor<'_>,
        now: TimestampMs,
        limit: i64,
    ) -> Result<Vec<QueueMessage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM message_queue \
             WHERE status_id = $1 AND lease_expires_at IS NOT NULL AND lease_expires_at <= $2 \
             ORDER BY lease_expires_at ASC \
             LIMIT $3 \
             FOR UPDATE SKIP LOCKED"
        );
        sqlx::query_as::<_, QueueMessage>(&query)
            .bind(MessageStatus::Processing.id())
            .bind(now)
            .bind(limit)
            .fetch_all(executor)
            .await
    }

    /// Aggregate queue statistics in a single scan.
    pub async fn queue_stats(
        executor: impl PgExecutor<'_>,
        now: TimestampMs,
    ) -> Result<QueueStats, sqlx::Error> {
        sqlx::query_as::<_, QueueStats>(
            "SELECT \
                 COUNT(*) FILTER (WHERE status_id = $1 AND scheduled_for <= $3) AS queued_ready, \
                 COUNT(*) FILTER (WHERE status_id = $2) AS processing, \
                 COUNT(*) FILTER (WHERE status_id = $4) AS dead_letter \
             FROM message_queue",
        )
        .bind(MessageStatus::Queued.id())
        .bind(MessageStatus::Processing.id())
        .bind(now)
        .bind(MessageStatus::DeadLetter.id())
        .fetch_one(executor)
        .await
    }

    /// Count distinct conversations with ready work that are not currently
    /// locked by a live lease. This is the demand signal for scaling.
    pub async fn ready_conversation_count(
        executor: impl PgExecutor<'_>,
        now: TimestampMs,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT m.conversation_id) \
             FROM message_queue m \
             LEFT JOIN conversations c ON c.conversation_id = m.conversation_id \
             WHERE m.status_id = $1 AND m.scheduled_for <= $2 \
               AND (c.lock_expires_at IS NULL OR c.lock_expires_at <= $2)",
        )
        .bind(MessageStatus::Queued.id())
        .bind(now)
        .fetch_one(executor)
        .await?;
        Ok(count)
    }

    /// List message summaries filtered by status, newest first.
    pub async fn list_by_status(
        executor: impl PgExecutor<'_>,
        status_id: StatusId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<MessageSummary>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        sqlx::query_as::<_, MessageSummary>(
            "SELECT id, conversation_id, agent_key, status_id, priority, scheduled_for, \
                    attempts, max_attempts, last_error, created_at \
             FROM message_queue \
             WHERE status_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3",
        )
        .bind(status_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
    }

    /// Find a message by its ID.
    pub async fn find_by_id(
        executor: impl PgExecutor<'_>,
        id: DbId,
    ) -> Result<Option<QueueMessage>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM message_queue WHERE id = $1");
        sqlx::query_as::<_, QueueMessage>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }
}
