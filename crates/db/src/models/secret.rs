//! Secret store entity models. Values are stored opaque; the store only
//! tracks references, versions, and which version is active.

use serde::Serialize;
use sqlx::FromRow;

use factory_core::types::{DbId, TimestampMs};

/// A row from the `secrets` table.
///
/// `value` is never serialized out of the data layer.
#[derive(Debug, Clone, FromRow)]
pub struct Secret {
    pub id: DbId,
    pub secret_ref: String,
    pub version: i32,
    pub value: String,
    pub active: bool,
    pub rotated_from: Option<i32>,
    pub created_at: TimestampMs,
}

/// Result of importing or rotating a secret, safe to return to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SecretImport {
    pub secret_ref: String,
    pub version: i32,
    pub rotated_from: Option<i32>,
}
