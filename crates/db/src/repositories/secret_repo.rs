//! Repository for the `secrets` table.
//!
//! Secrets are versioned per reference; at most one version per reference
//! is active. Rotation deactivates the old version and inserts the new one
//! in a single transaction.

use sqlx::{PgExecutor, PgPool};

use factory_core::types::TimestampMs;

use crate::models::secret::SecretImport;

/// Provides versioned secret storage.
pub struct SecretRepo;

impl SecretRepo {
    /// Fetch the active plaintext value for a secret reference.
    pub async fn find_active_value(
        executor: impl PgExecutor<'_>,
        secret_ref: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM secrets WHERE secret_ref = $1 AND active = TRUE \
             ORDER BY version DESC LIMIT 1",
        )
        .bind(secret_ref)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(|(value,)| value))
    }

    /// Import a secret value, rotating any existing active version.
    pub async fn import(
        pool: &PgPool,
        secret_ref: &str,
        value: &str,
        now: TimestampMs,
    ) -> Result<SecretImport, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current: Option<(i32,)> = sqlx::query_as(
            "SELECT version FROM secrets WHERE secret_ref = $1 AND active = TRUE \
             ORDER BY version DESC LIMIT 1 \
             FOR UPDATE",
        )
        .bind(secret_ref)
        .fetch_optional(&mut *tx)
        .await?;

        let rotated_from = current.map(|(v,)| v);
        let version = rotated_from.unwrap_or(0) + 1;

        if rotated_from.is_some() {
            sqlx::query("UPDATE secrets SET active = FALSE WHERE secret_ref = $1 AND active = TRUE")
                .bind(secret_ref)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO secrets (secret_ref, version, value, active, rotated_from, created_at) \
             VALUES ($1, $2, $3, TRUE, $4, $5)",
        )
        .bind(secret_ref)
        .bind(version)
        .bind(value)
        .bind(rotated_from)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SecretImport {
            secret_ref: secret_ref.to_string(),
            version,
            rotated_from,
        })
    }
}
