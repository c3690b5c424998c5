//! Repository for the `conversations` table.
//!
//! The processing lock lives in the `lock_*` columns. Lock transitions run
//! inside the queue engine's transactions, so every method takes an
//! executor.

use sqlx::PgExecutor;
use uuid::Uuid;

use factory_core::types::{DbId, TimestampMs};

use crate::models::conversation::Conversation;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "\
    id, conversation_id, agent_key, context_history, pending_tool_calls, \
    lock_lease_id, lock_worker_id, lock_expires_at, lock_heartbeat_at, \
    lock_message_id, created_at";

/// Provides lock transitions and lookups for conversations.
pub struct ConversationRepo;

impl ConversationRepo {
    /// Ensure a conversation row exists. Safe to call on every enqueue.
    pub async fn ensure(
        executor: impl PgExecutor<'_>,
        conversation_id: &str,
        agent_key: &str,
        now: TimestampMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO conversations (conversation_id, agent_key, created_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (conversation_id) DO NOTHING",
        )
        .bind(conversation_id)
        .bind(agent_key)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Fetch a conversation row-locked for a lock transition.
    pub async fn find_for_update(
        executor: impl PgExecutor<'_>,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM conversations WHERE conversation_id = $1 FOR UPDATE"
        );
        sqlx::query_as::<_, Conversation>(&query)
            .bind(conversation_id)
            .fetch_optional(executor)
            .await
    }

    /// Install the processing lock after a successful claim.
    pub async fn set_lock(
        executor: impl PgExecutor<'_>,
        conversation_id: &str,
        lease_id: Uuid,
        worker_id: &str,
        expires_at: TimestampMs,
        heartbeat_at: TimestampMs,
        message_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE conversations \
             SET lock_lease_id = $2, lock_worker_id = $3, lock_expires_at = $4, \
                 lock_heartbeat_at = $5, lock_message_id = $6 \
             WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .bind(lease_id)
        .bind(worker_id)
        .bind(expires_at)
        .bind(heartbeat_at)
        .bind(message_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Refresh a held lock's heartbeat and expiry. Guarded on the lease so
    /// a stale holder cannot resurrect a lock the sweep already released.
    pub async fn refresh_lock(
        executor: impl PgExecutor<'_>,
        conversation_id: &str,
        lease_id: Uuid,
        heartbeat_at: TimestampMs,
        expires_at: TimestampMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE conversations \
             SET lock_heartbeat_at = $3, lock_expires_at = $4 \
             WHERE conversation_id = $1 AND lock_lease_id = $2",
        )
        .bind(conversation_id)
        .bind(lease_id)
        .bind(heartbeat_at)
        .bind(expires_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear the processing lock if it is still held for the given message.
    /// A lock re-acquired for a newer message is left alone.
    pub async fn release_lock_for_message(
        executor: impl PgExecutor<'_>,
        conversation_id: &str,
        message_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE conversations \
             SET lock_lease_id = NULL, lock_worker_id = NULL, lock_expires_at = NULL, \
                 lock_heartbeat_at = NULL, lock_message_id = NULL \
             WHERE conversation_id = $1 AND lock_message_id = $2",
        )
        .bind(conversation_id)
        .bind(message_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a conversation by its external ID.
    pub async fn find_by_conversation_id(
        executor: impl PgExecutor<'_>,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM conversations WHERE conversation_id = $1");
        sqlx::query_as::<_, Conversation>(&query)
            .bind(conversation_id)
            .fetch_optional(executor)
            .await
    }
}
