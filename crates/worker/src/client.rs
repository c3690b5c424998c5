//! HTTP clients for the queue API and the local agent gateway.

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::json;

use factory_db::models::message::ClaimedJob;

/// Queue API responses arrive in a `{ "data": ... }` envelope.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct HeartbeatData {
    renewed: bool,
}

#[derive(Deserialize)]
struct CompleteData {
    completed: bool,
}

#[derive(Deserialize)]
struct FailData {
    acknowledged: bool,
}

/// Client for the queue API's worker endpoints.
#[derive(Clone)]
pub struct QueueClient {
    http: reqwest::Client,
    base_url: String,
    worker_id: String,
}

impl QueueClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            worker_id: worker_id.into(),
        }
    }

    /// Claim the next eligible message. `None` when the queue has nothing
    /// for us.
    pub async fn claim(&self) -> anyhow::Result<Option<ClaimedJob>> {
        let url = format!("{}/api/v1/queue/claim", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "worker_id": self.worker_id }))
            .send()
            .await
            .context("claim request failed")?;
        let envelope: Envelope<Option<ClaimedJob>> =
            Self::decode(response).await.context("claim")?;
        Ok(envelope.data)
    }

    /// Renew the lease on a claimed message. `false` means the lease was
    /// lost and the work must be abandoned.
    pub async fn heartbeat(&self, job: &ClaimedJob) -> anyhow::Result<bool> {
        let url = format!(
            "{}/api/v1/queue/messages/{}/heartbeat",
            self.base_url, job.message_id
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({ "worker_id": self.worker_id, "lease_id": job.lease_id }))
            .send()
            .await
            .context("heartbeat request failed")?;
        let envelope: Envelope<HeartbeatData> =
            Self::decode(response).await.context("heartbeat")?;
        Ok(envelope.data.renewed)
    }

    /// Mark a claimed message done. `false` means the lease was lost first.
    pub async fn complete(&self, job: &ClaimedJob) -> anyhow::Result<bool> {
        let url = format!(
            "{}/api/v1/queue/messages/{}/complete",
            self.base_url, job.message_id
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({ "worker_id": self.worker_id, "lease_id": job.lease_id }))
            .send()
            .await
            .context("complete request failed")?;
        let envelope: Envelope<CompleteData> =
            Self::decode(response).await.context("complete")?;
        Ok(envelope.data.completed)
    }

    /// Report a failed attempt. `false` means the lease was lost first.
    pub async fn fail(&self, job: &ClaimedJob, error: &str) -> anyhow::Result<bool> {
        let url = format!(
            "{}/api/v1/queue/messages/{}/fail",
            self.base_url, job.message_id
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "worker_id": self.worker_id,
                "lease_id": job.lease_id,
                "error": error,
            }))
            .send()
            .await
            .context("fail request failed")?;
        let envelope: Envelope<FailData> = Self::decode(response).await.context("fail")?;
        Ok(envelope.data.acknowledged)
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> anyhow::Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("queue API returned {status}: {body}");
        }
        Ok(response.json().await?)
    }
}

/// Client for the agent gateway running alongside this worker.
///
/// The gateway hosts the actual agent runtime; the worker hands it one
/// message at a time and waits for the turn to finish.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Deliver a claimed message to the gateway and wait for it to be
    /// processed.
    pub async fn deliver(&self, job: &ClaimedJob) -> anyhow::Result<()> {
        let url = format!(
            "{}/v1/conversations/{}/messages",
            self.base_url, job.conversation_id
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "agent_key": job.agent_key,
                "message_id": job.message_id,
                "payload": job.payload,
            }))
            .send()
            .await
            .context("gateway request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("agent gateway returned {status}: {body}");
        }
        Ok(())
    }
}
