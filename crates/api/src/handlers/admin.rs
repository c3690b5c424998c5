//! Handlers for agent profile and secret administration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use factory_core::error::CoreError;
use factory_db::models::agent::{AgentProfile, UpsertAgentProfile};
use factory_db::models::secret::SecretImport;
use factory_db::repositories::agent_profile_repo::AgentProfileRepo;
use factory_db::repositories::secret_repo::SecretRepo;
use factory_queue::now_ms;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ImportSecretRequest {
    pub secret_ref: String,
    pub value: String,
}

// ---------------------------------------------------------------------------
// PUT /admin/agents
// ---------------------------------------------------------------------------

/// Create or update an agent profile, keyed by `agent_key`.
pub async fn upsert_agent(
    State(state): State<AppState>,
    Json(input): Json<UpsertAgentProfile>,
) -> AppResult<impl IntoResponse> {
    if input.agent_key.trim().is_empty() {
        return Err(AppError::BadRequest("agent_key must not be empty".into()));
    }
    if input.soul_md.trim().is_empty() {
        return Err(AppError::BadRequest("soul_md must not be empty".into()));
    }

    let profile = AgentProfileRepo::upsert(&state.pool, &input, now_ms()).await?;
    Ok(Json(DataResponse { data: profile }))
}

// ---------------------------------------------------------------------------
// GET /admin/agents
// ---------------------------------------------------------------------------

/// List all agent profiles.
pub async fn list_agents(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<AgentProfile>>>> {
    let profiles = AgentProfileRepo::list(&state.pool).await?;
    Ok(Json(DataResponse { data: profiles }))
}

// ---------------------------------------------------------------------------
// GET /admin/agents/{agent_key}
// ---------------------------------------------------------------------------

/// Fetch a single agent profile by key.
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_key): Path<String>,
) -> AppResult<Json<DataResponse<AgentProfile>>> {
    let profile = AgentProfileRepo::find_by_key(&state.pool, &agent_key)
        .await?
        .ok_or_else(|| AppError::Core(CoreError::AgentNotFound(agent_key)))?;
    Ok(Json(DataResponse { data: profile }))
}

// ---------------------------------------------------------------------------
// POST /admin/secrets
// ---------------------------------------------------------------------------

/// Import a secret value under a new version, deactivating the previous one.
///
/// The response never echoes the value.
pub async fn import_secret(
    State(state): State<AppState>,
    Json(input): Json<ImportSecretRequest>,
) -> AppResult<impl IntoResponse> {
    if input.secret_ref.trim().is_empty() {
        return Err(AppError::BadRequest("secret_ref must not be empty".into()));
    }
    if input.value.is_empty() {
        return Err(AppError::BadRequest("value must not be empty".into()));
    }

    let imported: SecretImport =
        SecretRepo::import(&state.pool, &input.secret_ref, &input.value, now_ms()).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: imported })))
}
