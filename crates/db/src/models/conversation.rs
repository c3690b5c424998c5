//! Conversation entity models. The conversation is the unit of mutual
//! exclusion: its processing lock admits at most one in-flight message.

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use factory_core::types::{DbId, TimestampMs};

/// A row from the `conversations` table.
///
/// The processing lock is flattened into the `lock_*` columns; either all
/// five are set (locked) or all are NULL (free).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Conversation {
    pub id: DbId,
    pub conversation_id: String,
    pub agent_key: String,
    pub context_history: serde_json::Value,
    pub pending_tool_calls: serde_json::Value,
    pub lock_lease_id: Option<Uuid>,
    pub lock_worker_id: Option<String>,
    pub lock_expires_at: Option<TimestampMs>,
    pub lock_heartbeat_at: Option<TimestampMs>,
    pub lock_message_id: Option<DbId>,
    pub created_at: TimestampMs,
}

/// Assembled view of a live processing lock.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingLock {
    pub lease_id: Uuid,
    pub worker_id: String,
    pub lease_expires_at: TimestampMs,
    pub heartbeat_at: TimestampMs,
    pub claimed_message_id: DbId,
}

impl Conversation {
    /// Return the processing lock when all lock columns are present.
    pub fn processing_lock(&self) -> Option<ProcessingLock> {
        Some(ProcessingLock {
            lease_id: self.lock_lease_id?,
            worker_id: self.lock_worker_id.clone()?,
            lease_expires_at: self.lock_expires_at?,
            heartbeat_at: self.lock_heartbeat_at?,
            claimed_message_id: self.lock_message_id?,
        })
    }
}
