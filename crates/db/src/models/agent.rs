//! Agent profile entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use factory_core::types::{DbId, TimestampMs};

/// A row from the `agent_profiles` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AgentProfile {
    pub id: DbId,
    pub agent_key: String,
    pub version: String,
    pub soul_md: String,
    pub client_md: Option<String>,
    pub skills: serde_json::Value,
    pub runtime_config: serde_json::Value,
    pub secret_refs: serde_json::Value,
    pub enabled: bool,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

/// DTO for creating or updating an agent profile, keyed by `agent_key`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertAgentProfile {
    pub agent_key: String,
    pub version: String,
    pub soul_md: String,
    #[serde(default)]
    pub client_md: Option<String>,
    #[serde(default = "default_json_array")]
    pub skills: serde_json::Value,
    #[serde(default = "default_json_object")]
    pub runtime_config: serde_json::Value,
    #[serde(default = "default_json_array")]
    pub secret_refs: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_json_array() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

fn default_json_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_enabled() -> bool {
    true
}
