//! The queue engine: message lifecycle operations, each one a single
//! Postgres transaction.
//!
//! Claim safety rests on two locks: `FOR UPDATE SKIP LOCKED` over the due
//! batch, and a `FOR UPDATE` on the conversation row before the
//! conversation-lock check. Two concurrent claimers can scan the same
//! conversation's messages but only one can win the conversation.

use uuid::Uuid;

use factory_core::config::FactoryConfig;
use factory_core::error::CoreError;
use factory_core::queue::{
    claim_order, lock_is_live, plan_failure, plan_load_release, ClaimCandidate, FailureOutcome,
};
use factory_core::types::{DbId, TimestampMs};
use factory_db::models::delayed_task::TaskKind;
use factory_db::models::message::{ClaimedJob, EnqueueMessage, MessageSummary, QueueMessage, QueueStats};
use factory_db::models::status::MessageStatus;
use factory_db::models::worker::WorkerStats;
use factory_db::repositories::agent_profile_repo::AgentProfileRepo;
use factory_db::repositories::conversation_repo::ConversationRepo;
use factory_db::repositories::delayed_task_repo::DelayedTaskRepo;
use factory_db::repositories::message_repo::MessageRepo;
use factory_db::repositories::worker_repo::WorkerRepo;
use factory_db::DbPool;

use crate::error::QueueError;
use crate::now_ms;

/// Error recorded on messages reclaimed by the stuck-lease sweep.
const LEASE_EXPIRED_ERROR: &str = "Lease expired while processing";

/// Batch size for one sweep pass when the caller supplies no limit.
const DEFAULT_SWEEP_BATCH: i64 = 100;

/// Hard cap on a single sweep batch.
const MAX_SWEEP_BATCH: i64 = 500;

/// Counters from one stuck-lease sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SweepOutcome {
    /// Expired-lease messages reverted to queued.
    pub requeued: u64,
    /// Conversation locks released along the way.
    pub unlocked: u64,
}

/// Message-queue lifecycle operations over a shared pool.
#[derive(Clone)]
pub struct QueueEngine {
    pool: DbPool,
    config: FactoryConfig,
}

impl QueueEngine {
    pub fn new(pool: DbPool, config: FactoryConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Accept a message into the queue.
    ///
    /// Gated on an enabled agent profile; the conversation row is created
    /// on first contact. A reconcile nudge is scheduled after commit,
    /// best-effort.
    pub async fn enqueue(&self, input: &EnqueueMessage) -> Result<QueueMessage, QueueError> {
        let now = now_ms();

        if input.conversation_id.trim().is_empty() {
            return Err(CoreError::Validation("conversation_id must not be empty".into()).into());
        }

        let profile = AgentProfileRepo::find_by_key(&self.pool, &input.agent_key)
            .await?
            .ok_or_else(|| CoreError::AgentNotFound(input.agent_key.clone()))?;
        if !profile.enabled {
            return Err(CoreError::AgentDisabled(input.agent_key.clone()).into());
        }

        let priority = input
            .priority
            .unwrap_or(self.config.queue.default_priority)
            .clamp(0, self.config.queue.max_priority);
        let scheduled_for = input.scheduled_for.unwrap_or(now);
        let max_attempts = input.max_attempts.unwrap_or(self.config.retry.max_attempts);
        let payload = serde_json::to_value(&input.payload)?;

        let mut tx = self.pool.begin().await?;
        ConversationRepo::ensure(&mut *tx, &input.conversation_id, &input.agent_key, now).await?;
        let message = MessageRepo::insert(
            &mut *tx,
            &input.conversation_id,
            &input.agent_key,
            &payload,
            priority,
            scheduled_for,
            max_attempts,
            now,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            message_id = message.id,
            conversation_id = %message.conversation_id,
            agent_key = %message.agent_key,
            priority,
            "message enqueued"
        );

        // New work should wake the reconciler without waiting a full
        // interval. Losing the nudge only delays scaling, so a failure
        // here must not fail the enqueue.
        if let Err(error) =
            DelayedTaskRepo::schedule(&self.pool, TaskKind::ReconcileNudge, now, None, now).await
        {
            tracing::warn!(%error, "failed to schedule reconcile nudge");
        }

        Ok(message)
    }

    /// Claim the next eligible message for a worker.
    ///
    /// Scans the due batch in claim order and takes the first message
    /// whose conversation is not locked by a live lease. Returns `None`
    /// when nothing is eligible.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>, QueueError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let batch = MessageRepo::due_queued_for_claim(
            &mut *tx,
            now,
            self.config.queue.claim_batch_size,
        )
        .await?;
        if batch.is_empty() {
            tx.commit().await?;
            return Ok(None);
        }

        let mut candidates: Vec<ClaimCandidate> = batch
            .iter()
            .map(|m| ClaimCandidate {
                message_id: m.id,
                conversation_id: m.conversation_id.clone(),
                priority: m.priority,
                scheduled_for: m.scheduled_for,
            })
            .collect();
        candidates.sort_by(claim_order);

        for candidate in &candidates {
            let message = batch
                .iter()
                .find(|m| m.id == candidate.message_id)
                .ok_or_else(|| CoreError::Internal("claim candidate vanished from batch".into()))?;

            let conversation =
                match ConversationRepo::find_for_update(&mut *tx, &candidate.conversation_id)
                    .await?
                {
                    Some(conversation) => conversation,
                    // Messages predating the ensure-on-enqueue path.
                    None => {
                        ConversationRepo::ensure(
                            &mut *tx,
                            &candidate.conversation_id,
                            &message.agent_key,
                            now,
                        )
                        .await?;
                        match ConversationRepo::find_for_update(
                            &mut *tx,
                            &candidate.conversation_id,
                        )
                        .await?
                        {
                            Some(conversation) => conversation,
                            None => continue,
                        }
                    }
                };

            if lock_is_live(conversation.lock_expires_at, now) {
                continue;
            }

            let lease_id = Uuid::new_v4();
            let lease_expires_at = now + self.config.lease.lease_ms;

            MessageRepo::mark_processing(&mut *tx, message.id, worker_id, lease_id, lease_expires_at)
                .await?;
            ConversationRepo::set_lock(
                &mut *tx,
                &message.conversation_id,
                lease_id,
                worker_id,
                lease_expires_at,
                now,
                message.id,
            )
            .await?;
            WorkerRepo::record_claim(
                &mut *tx,
                worker_id,
                self.config.provider.kind.as_str(),
                now,
            )
            .await?;
            tx.commit().await?;

            tracing::info!(
                message_id = message.id,
                conversation_id = %message.conversation_id,
                worker_id,
                lease_id = %lease_id,
                "message claimed"
            );

            let payload = serde_json::from_value(message.payload.clone())?;
            return Ok(Some(ClaimedJob {
                message_id: message.id,
                conversation_id: message.conversation_id.clone(),
                agent_key: message.agent_key.clone(),
                lease_id,
                lease_expires_at,
                payload,
            }));
        }

        tx.commit().await?;
        Ok(None)
    }

    /// Renew a claim's lease and the conversation lock.
    ///
    /// Returns `false` without mutating anything when the caller no
    /// longer owns the message; the worker must abandon the work.
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        message_id: DbId,
        lease_id: Uuid,
    ) -> Result<bool, QueueError> {
        let now = now_ms();
        let new_expires_at = now + self.config.lease.lease_ms;
        let mut tx = self.pool.begin().await?;

        let conversation_id =
            MessageRepo::extend_lease(&mut *tx, message_id, worker_id, lease_id, new_expires_at)
                .await?;
        let Some(conversation_id) = conversation_id else {
            tx.rollback().await?;
            return Ok(false);
        };

        ConversationRepo::refresh_lock(&mut *tx, &conversation_id, lease_id, now, new_expires_at)
            .await?;
        WorkerRepo::touch_heartbeat(&mut *tx, worker_id, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Mark an owned message done and release the conversation and worker.
    ///
    /// Returns `false` when the ownership check fails (lease lost).
    pub async fn complete(
        &self,
        worker_id: &str,
        message_id: DbId,
        lease_id: Uuid,
    ) -> Result<bool, QueueError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let Some(message) =
            MessageRepo::find_owned_for_update(&mut *tx, message_id, worker_id, lease_id).await?
        else {
            tx.rollback().await?;
            return Ok(false);
        };

        MessageRepo::mark_done(&mut *tx, message.id).await?;
        ConversationRepo::release_lock_for_message(&mut *tx, &message.conversation_id, message.id)
            .await?;
        self.release_worker_load(&mut tx, worker_id, now).await?;
        tx.commit().await?;

        tracing::info!(
            message_id,
            conversation_id = %message.conversation_id,
            worker_id,
            "message completed"
        );
        Ok(true)
    }

    /// Record a failed attempt on an owned message.
    ///
    /// Requeues with backoff while attempts remain, dead-letters
    /// otherwise. Returns `None` when the ownership check fails.
    pub async fn fail(
        &self,
        worker_id: &str,
        message_id: DbId,
        lease_id: Uuid,
        error: &str,
    ) -> Result<Option<FailureOutcome>, QueueError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let Some(message) =
            MessageRepo::find_owned_for_update(&mut *tx, message_id, worker_id, lease_id).await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let outcome = plan_failure(message.attempts, message.max_attempts, &self.config.retry, now);
        match &outcome {
            FailureOutcome::Requeue {
                attempts,
                scheduled_for,
            } => {
                MessageRepo::requeue_for_retry(&mut *tx, message.id, *attempts, *scheduled_for, error)
                    .await?;
                tracing::warn!(
                    message_id,
                    attempts,
                    retry_at = scheduled_for,
                    error,
                    "message failed, requeued"
                );
            }
            FailureOutcome::DeadLetter {
                attempts,
                dead_lettered_at,
            } => {
                MessageRepo::dead_letter(&mut *tx, message.id, *attempts, *dead_lettered_at, error)
                    .await?;
                tracing::error!(message_id, attempts, error, "message dead-lettered");
            }
        }

        ConversationRepo::release_lock_for_message(&mut *tx, &message.conversation_id, message.id)
            .await?;
        self.release_worker_load(&mut tx, worker_id, now).await?;
        tx.commit().await?;
        Ok(Some(outcome))
    }

    /// Revert processing messages whose lease expired back to queued.
    ///
    /// Safe to run concurrently and repeatedly: the batch is row-locked
    /// with `SKIP LOCKED` and already-reverted messages no longer match,
    /// so a second sweep over the same state is a no-op.
    pub async fn release_stuck(&self, limit: Option<i64>) -> Result<SweepOutcome, QueueError> {
        let now = now_ms();
        let batch = limit.unwrap_or(DEFAULT_SWEEP_BATCH).clamp(1, MAX_SWEEP_BATCH);
        let mut tx = self.pool.begin().await?;

        let expired = MessageRepo::expired_processing(&mut *tx, now, batch).await?;
        let mut requeued = 0u64;
        let mut unlocked = 0u64;
        for message in &expired {
            MessageRepo::requeue_expired(&mut *tx, message.id, now, LEASE_EXPIRED_ERROR).await?;
            if ConversationRepo::release_lock_for_message(
                &mut *tx,
                &message.conversation_id,
                message.id,
            )
            .await?
            {
                unlocked += 1;
            }
            requeued += 1;
        }
        tx.commit().await?;

        if requeued > 0 {
            tracing::warn!(requeued, unlocked, "released stuck messages back to queued");
        }
        Ok(SweepOutcome { requeued, unlocked })
    }

    /// Queue counters for the stats endpoint.
    pub async fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        Ok(MessageRepo::queue_stats(&self.pool, now_ms()).await?)
    }

    /// Fleet counters for the stats endpoint.
    pub async fn worker_stats(&self) -> Result<WorkerStats, QueueError> {
        Ok(WorkerRepo::stats(&self.pool).await?)
    }

    /// Operator listing of messages in a given status.
    pub async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<MessageSummary>, QueueError> {
        Ok(MessageRepo::list_by_status(&self.pool, status.id(), limit, offset).await?)
    }

    /// Drop one unit of worker load; when the worker goes idle, arm its
    /// shutdown deadline and schedule the matching idle check.
    async fn release_worker_load(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        worker_id: &str,
        now: TimestampMs,
    ) -> Result<(), QueueError> {
        let Some(worker) = WorkerRepo::find_for_update(&mut **tx, worker_id).await? else {
            return Ok(());
        };

        let release = plan_load_release(
            worker.load,
            worker.last_claim_at,
            self.config.scaling.idle_timeout_ms,
            now,
        );
        WorkerRepo::apply_load_release(
            &mut **tx,
            worker_id,
            release.load_after,
            release.scheduled_shutdown_at,
            now,
        )
        .await?;

        if let Some(deadline) = release.scheduled_shutdown_at {
            DelayedTaskRepo::schedule(
                &mut **tx,
                TaskKind::IdleCheck,
                deadline,
                Some(worker_id),
                now,
            )
            .await?;
        }
        Ok(())
    }
}
