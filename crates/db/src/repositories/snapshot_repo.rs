//! Repository for the `hydration_snapshots` table.
//!
//! Snapshots are built and consumed by the hydration collaborator; the
//! control plane only performs best-effort expiry housekeeping.

use sqlx::PgExecutor;

use factory_core::types::TimestampMs;

use crate::models::status::SnapshotStatus;

/// Provides housekeeping for hydration snapshots.
pub struct SnapshotRepo;

impl SnapshotRepo {
    /// Flip `ready` snapshots whose expiry has passed to `expired`.
    /// Returns the number of rows updated.
    pub async fn expire_stale(
        executor: impl PgExecutor<'_>,
        now: TimestampMs,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE hydration_snapshots SET status_id = $1 \
             WHERE status_id = $2 AND expires_at <= $3",
        )
        .bind(SnapshotStatus::Expired.id())
        .bind(SnapshotStatus::Ready.id())
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
