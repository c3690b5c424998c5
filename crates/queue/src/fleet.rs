//! Storage seam for the reconciler.
//!
//! The reconciler reads demand and the worker directory, writes worker
//! state, and resolves secrets through this trait, so tests can run a
//! full pass against an in-memory store.

use async_trait::async_trait;

use factory_core::plan::{DemandSnapshot, WorkerSnapshot};
use factory_core::types::TimestampMs;
use factory_db::models::worker::UpsertWorkerState;
use factory_db::repositories::message_repo::MessageRepo;
use factory_db::repositories::secret_repo::SecretRepo;
use factory_db::repositories::snapshot_repo::SnapshotRepo;
use factory_db::repositories::worker_repo::WorkerRepo;
use factory_db::DbPool;

use crate::error::QueueError;

/// What the reconciler needs from persistent state.
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Current demand: due queued messages and ready conversations.
    async fn queue_demand(&self, now: TimestampMs) -> Result<DemandSnapshot, QueueError>;

    /// Active worker directory rows as planner snapshots.
    async fn list_active_workers(&self) -> Result<Vec<WorkerSnapshot>, QueueError>;

    /// Apply a reconciler decision to the directory.
    async fn upsert_worker_state(
        &self,
        update: &UpsertWorkerState,
        now: TimestampMs,
    ) -> Result<(), QueueError>;

    /// Resolve the active value of a secret reference.
    async fn get_secret(&self, secret_ref: &str) -> Result<Option<String>, QueueError>;

    /// Housekeeping: expire stale hydration snapshots. Best-effort.
    async fn expire_stale_snapshots(&self, now: TimestampMs) -> Result<u64, QueueError>;
}

// Shared-ownership delegation so an `Arc<S>` store can be handed to both
// the reconciler and its caller.
#[async_trait]
impl<T: FleetStore + ?Sized> FleetStore for std::sync::Arc<T> {
    async fn queue_demand(&self, now: TimestampMs) -> Result<DemandSnapshot, QueueError> {
        self.as_ref().queue_demand(now).await
    }

    async fn list_active_workers(&self) -> Result<Vec<WorkerSnapshot>, QueueError> {
        self.as_ref().list_active_workers().await
    }

    async fn upsert_worker_state(
        &self,
        update: &UpsertWorkerState,
        now: TimestampMs,
    ) -> Result<(), QueueError> {
        self.as_ref().upsert_worker_state(update, now).await
    }

    async fn get_secret(&self, secret_ref: &str) -> Result<Option<String>, QueueError> {
        self.as_ref().get_secret(secret_ref).await
    }

    async fn expire_stale_snapshots(&self, now: TimestampMs) -> Result<u64, QueueError> {
        self.as_ref().expire_stale_snapshots(now).await
    }
}

/// Postgres-backed store used in production.
#[derive(Clone)]
pub struct PgFleetStore {
    pool: DbPool,
}

impl PgFleetStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FleetStore for PgFleetStore {
    async fn queue_demand(&self, now: TimestampMs) -> Result<DemandSnapshot, QueueError> {
        let stats = MessageRepo::queue_stats(&self.pool, now).await?;
        let ready_conversations = MessageRepo::ready_conversation_count(&self.pool, now).await?;
        Ok(DemandSnapshot {
            queued_ready: stats.queued_ready,
            ready_conversations,
        })
    }

    async fn list_active_workers(&self) -> Result<Vec<WorkerSnapshot>, QueueError> {
        let workers = WorkerRepo::list_active(&self.pool).await?;
        Ok(workers.iter().map(|w| w.to_snapshot()).collect())
    }

    async fn upsert_worker_state(
        &self,
        update: &UpsertWorkerState,
        now: TimestampMs,
    ) -> Result<(), QueueError> {
        WorkerRepo::upsert_state(&self.pool, update, now).await?;
        Ok(())
    }

    async fn get_secret(&self, secret_ref: &str) -> Result<Option<String>, QueueError> {
        Ok(SecretRepo::find_active_value(&self.pool, secret_ref).await?)
    }

    async fn expire_stale_snapshots(&self, now: TimestampMs) -> Result<u64, QueueError> {
        Ok(SnapshotRepo::expire_stale(&self.pool, now).await?)
    }
}
