//! Fly Machines implementation of [`WorkerProvider`].
//!
//! Wraps the Fly Machines REST API (machine create/list/cordon/stop/
//! destroy, volume resolution) using [`reqwest`]. One instance is scoped
//! to a single Fly app.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::volume::dedicated_volume_name;
use crate::{MachineStatus, ProviderWorker, SpawnWorkerInput, SpawnedWorker, WorkerProvider};

/// Default Fly Machines API base URL.
const DEFAULT_BASE_URL: &str = "https://api.machines.dev/v1";

/// Guest sizing applied to every worker machine.
const GUEST_CPU_KIND: &str = "shared";
const GUEST_CPUS: u32 = 1;
const GUEST_MEMORY_MB: u32 = 2048;

/// Fly Machines client for one app.
pub struct FlyMachinesProvider {
    client: reqwest::Client,
    api_token: String,
    base_url: String,
    app_name: String,
}

#[derive(Debug, Deserialize)]
struct FlyMachine {
    id: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    private_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlyVolume {
    id: String,
    name: String,
    #[serde(default)]
    region: Option<String>,
}

impl FlyMachinesProvider {
    /// Create a client for the given app using the default API base URL.
    pub fn new(api_token: String, app_name: String) -> Self {
        Self::with_base_url(api_token, app_name, DEFAULT_BASE_URL.to_string())
    }

    /// Create a client against a non-default base URL (test servers).
    pub fn with_base_url(api_token: String, app_name: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_token,
            base_url,
            app_name,
        }
    }

    /// Find the worker's dedicated volume in its region, creating it if
    /// absent. Returns the Fly volume ID.
    async fn resolve_or_create_volume(
        &self,
        volume_prefix: &str,
        worker_id: &str,
        region: &str,
        size_gb: i64,
    ) -> Result<String, ProviderError> {
        let volume_name = dedicated_volume_name(volume_prefix, worker_id);
        let path = format!("/apps/{}/volumes", self.app_name);

        let volumes: Vec<FlyVolume> = self.get(&path).await?;
        if let Some(found) = volumes
            .iter()
            .find(|v| v.name == volume_name && v.region.as_deref() == Some(region))
        {
            return Ok(found.id.clone());
        }

        let created: FlyVolume = self
            .post(
                &path,
                &serde_json::json!({
                    "name": volume_name,
                    "region": region,
                    "size_gb": size_gb,
                }),
            )
            .await?;
        Ok(created.id)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    /// POST with no body, for lifecycle verbs that return no payload.
    async fn post_empty(&self, path: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerProvider for FlyMachinesProvider {
    async fn spawn_worker(&self, input: &SpawnWorkerInput) -> Result<SpawnedWorker, ProviderError> {
        let mut env: BTreeMap<String, String> = BTreeMap::new();
        env.insert(
            "AGENT_FACTORY_WORKER_ID".to_string(),
            input.worker_id.clone(),
        );
        env.extend(input.env.clone());

        let mut config = serde_json::json!({
            "image": input.image,
            "guest": {
                "cpu_kind": GUEST_CPU_KIND,
                "cpus": GUEST_CPUS,
                "memory_mb": GUEST_MEMORY_MB,
            },
            "env": env,
        });

        if let (Some(volume_name), Some(volume_path)) = (&input.volume_name, &input.volume_path) {
            let volume_id = self
                .resolve_or_create_volume(
                    volume_name,
                    &input.worker_id,
                    &input.region,
                    input.volume_size_gb,
                )
                .await?;
            config["mounts"] = serde_json::json!([
                { "volume": volume_id, "path": volume_path }
            ]);
        }

        let payload = serde_json::json!({
            "name": input.worker_id,
            "region": input.region,
            "config": config,
        });

        let machine: FlyMachine = self
            .post(&format!("/apps/{}/machines", self.app_name), &payload)
            .await?;

        tracing::info!(
            worker_id = %input.worker_id,
            machine_id = %machine.id,
            region = ?machine.region,
            "spawned fly machine"
        );

        Ok(SpawnedWorker {
            region: machine.region.or_else(|| Some(input.region.clone())),
            machine_id: machine.id,
        })
    }

    async fn list_workers(&self) -> Result<Vec<ProviderWorker>, ProviderError> {
        let machines: Vec<FlyMachine> = self
            .get(&format!("/apps/{}/machines", self.app_name))
            .await?;
        Ok(machines
            .into_iter()
            .map(|machine| ProviderWorker {
                status: map_fly_state(machine.state.as_deref()),
                machine_id: machine.id,
                region: machine.region,
                private_ip: machine.private_ip,
            })
            .collect())
    }

    async fn cordon_worker(&self, machine_id: &str) -> Result<(), ProviderError> {
        self.post_empty(&format!(
            "/apps/{}/machines/{}/cordon",
            self.app_name, machine_id
        ))
        .await
    }

    async fn stop_worker(&self, machine_id: &str) -> Result<(), ProviderError> {
        self.post_empty(&format!(
            "/apps/{}/machines/{}/stop",
            self.app_name, machine_id
        ))
        .await
    }

    async fn terminate_worker(&self, machine_id: &str) -> Result<(), ProviderError> {
        self.delete(&format!(
            "/apps/{}/machines/{}",
            self.app_name, machine_id
        ))
        .await
    }
}

/// Normalize Fly machine states to provider statuses.
fn map_fly_state(state: Option<&str>) -> MachineStatus {
    match state {
        Some("created") => MachineStatus::Starting,
        Some("started") => MachineStatus::Active,
        Some("stopped") | Some("destroyed") => MachineStatus::Stopped,
        Some("suspended") => MachineStatus::Idle,
        _ => MachineStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fly_states_map_to_normalized_statuses() {
        assert_eq!(map_fly_state(Some("created")), MachineStatus::Starting);
        assert_eq!(map_fly_state(Some("started")), MachineStatus::Active);
        assert_eq!(map_fly_state(Some("stopped")), MachineStatus::Stopped);
        assert_eq!(map_fly_state(Some("destroyed")), MachineStatus::Stopped);
        assert_eq!(map_fly_state(Some("suspended")), MachineStatus::Idle);
        assert_eq!(map_fly_state(Some("replacing")), MachineStatus::Failed);
        assert_eq!(map_fly_state(None), MachineStatus::Failed);
    }
}
