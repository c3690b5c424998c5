//! Queue message entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

use factory_core::types::{DbId, TimestampMs};

use crate::models::status::StatusId;

/// Opaque inbound-message bundle carried through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Chat provider the message arrived from (e.g. `telegram`).
    pub provider: String,
    pub provider_user_id: String,
    pub message_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_update_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// A row from the `message_queue` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueueMessage {
    pub id: DbId,
    pub conversation_id: String,
    pub agent_key: String,
    pub payload: serde_json::Value,
    pub status_id: StatusId,
    pub priority: i32,
    pub scheduled_for: TimestampMs,
    pub claimed_by: Option<String>,
    pub lease_id: Option<Uuid>,
    pub lease_expires_at: Option<TimestampMs>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<TimestampMs>,
    pub dead_lettered_at: Option<TimestampMs>,
    pub created_at: TimestampMs,
}

/// DTO for enqueueing a message.
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueMessage {
    pub conversation_id: String,
    pub agent_key: String,
    pub payload: MessagePayload,
    pub priority: Option<i32>,
    pub scheduled_for: Option<TimestampMs>,
    pub max_attempts: Option<i32>,
}

/// The unit of work handed to a worker by a successful claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub message_id: DbId,
    pub conversation_id: String,
    pub agent_key: String,
    pub lease_id: Uuid,
    pub lease_expires_at: TimestampMs,
    pub payload: MessagePayload,
}

/// Aggregate queue statistics.
#[derive(Debug, Clone, Copy, FromRow, Serialize)]
pub struct QueueStats {
    /// Queued messages whose scheduled time has arrived.
    pub queued_ready: i64,
    pub processing: i64,
    pub dead_letter: i64,
}

/// Operator-facing summary row for job listings.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MessageSummary {
    pub id: DbId,
    pub conversation_id: String,
    pub agent_key: String,
    pub status_id: StatusId,
    pub priority: i32,
    pub scheduled_for: TimestampMs,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub created_at: TimestampMs,
}
