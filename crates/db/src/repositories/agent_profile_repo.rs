//! Repository for the `agent_profiles` table.

use sqlx::PgExecutor;

use factory_core::types::TimestampMs;

use crate::models::agent::{AgentProfile, UpsertAgentProfile};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "\
    id, agent_key, version, soul_md, client_md, skills, runtime_config, \
    secret_refs, enabled, created_at, updated_at";

/// Provides lookups and upserts for agent profiles.
pub struct AgentProfileRepo;

impl AgentProfileRepo {
    /// Find a profile by its agent key.
    pub async fn find_by_key(
        executor: impl PgExecutor<'_>,
        agent_key: &str,
    ) -> Result<Option<AgentProfile>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM agent_profiles WHERE agent_key = $1");
        sqlx::query_as::<_, AgentProfile>(&query)
            .bind(agent_key)
            .fetch_optional(executor)
            .await
    }

    /// Create or replace a profile, keyed by `agent_key`.
    pub async fn upsert(
        executor: impl PgExecutor<'_>,
        input: &UpsertAgentProfile,
        now: TimestampMs,
    ) -> Result<AgentProfile, sqlx::Error> {
        let query = format!(
            "INSERT INTO agent_profiles \
                 (agent_key, version, soul_md, client_md, skills, runtime_config, \
                  secret_refs, enabled, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             ON CONFLICT (agent_key) DO UPDATE SET \
                 version = EXCLUDED.version, \
                 soul_md = EXCLUDED.soul_md, \
                 client_md = EXCLUDED.client_md, \
                 skills = EXCLUDED.skills, \
                 runtime_config = EXCLUDED.runtime_config, \
                 secret_refs = EXCLUDED.secret_refs, \
                 enabled = EXCLUDED.enabled, \
                 updated_at = EXCLUDED.updated_at \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AgentProfile>(&query)
            .bind(&input.agent_key)
            .bind(&input.version)
            .bind(&input.soul_md)
            .bind(&input.client_md)
            .bind(&input.skills)
            .bind(&input.runtime_config)
            .bind(&input.secret_refs)
            .bind(input.enabled)
            .bind(now)
            .fetch_one(executor)
            .await
    }

    /// List all profiles, newest first.
    pub async fn list(
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<AgentProfile>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM agent_profiles ORDER BY updated_at DESC");
        sqlx::query_as::<_, AgentProfile>(&query)
            .fetch_all(executor)
            .await
    }
}
