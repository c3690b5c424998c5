//! The fleet reconciler: one pass converges the worker pool toward queue
//! demand.
//!
//! A pass is stateless. It re-derives everything from the queue, the
//! worker directory, and the provider's live machine list, so overlapping
//! or repeated passes are safe: spawn IDs are deterministic per
//! millisecond and worker upserts are idempotent.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use factory_core::config::{
    FactoryConfig, ProviderConfig, ProviderKind, ScalingPolicy, SECRET_REF_PROVIDER_TOKEN,
    SECRET_REF_QUEUE_ENDPOINT,
};
use factory_core::error::CoreError;
use factory_core::plan::{
    due_idle_workers, excess_drain_candidates, find_stale_workers, plan_capacity, spawn_count,
    WorkerSnapshot,
};
use factory_core::types::TimestampMs;
use factory_db::models::status::WorkerStatus;
use factory_db::models::worker::UpsertWorkerState;
use factory_provider::{FlyMachinesProvider, SpawnWorkerInput, WorkerProvider};

use crate::error::QueueError;
use crate::fleet::FleetStore;
use crate::now_ms;

/// Baseline environment for spawned worker machines, merged under the
/// per-spawn variables.
const DEFAULT_WORKER_RUNTIME_ENV: &[(&str, &str)] = &[
    ("AGENT_GATEWAY_HOST", "127.0.0.1"),
    ("AGENT_GATEWAY_PORT", "18789"),
    ("AGENT_GATEWAY_URL", "http://127.0.0.1:18789"),
    ("AGENT_STATE_DIR", "/data/.agent-factory"),
    ("AGENT_WORKSPACE_DIR", "/data/workspace"),
    ("AGENT_REQUIRE_DATA_MOUNT", "true"),
];

/// Builds a provider client for a reconcile pass. Injected so tests can
/// substitute a fake.
pub type ProviderFactory = Box<
    dyn Fn(ProviderKind, &str, &str) -> Result<Arc<dyn WorkerProvider>, QueueError> + Send + Sync,
>;

/// Per-invocation policy overrides for a reconcile pass.
///
/// Anything left `None` falls back to the reconciler's construction-time
/// configuration. Overrides apply to that pass only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReconcileOverrides {
    pub scaling: Option<ScalingPolicy>,
    pub provider: Option<ProviderConfig>,
}

/// Telemetry from one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub desired_workers: i32,
    /// Active workers after drift healing, before this pass's changes.
    pub active_workers: i32,
    pub spawned: i32,
    pub terminated: i32,
    pub queued_ready: i64,
    pub ready_conversations: i64,
}

/// Converges the worker fleet toward queue demand.
pub struct Reconciler<S: FleetStore> {
    store: S,
    config: FactoryConfig,
    workspace_id: String,
    providers: ProviderFactory,
}

impl<S: FleetStore> Reconciler<S> {
    /// Reconciler with the real provider implementations.
    pub fn new(store: S, config: FactoryConfig) -> Self {
        Self::with_provider_factory(
            store,
            config,
            Box::new(|kind, api_token, app_name| match kind {
                ProviderKind::Fly => Ok(Arc::new(FlyMachinesProvider::new(
                    api_token.to_string(),
                    app_name.to_string(),
                )) as Arc<dyn WorkerProvider>),
                other => Err(CoreError::UnsupportedProvider(other.to_string()).into()),
            }),
        )
    }

    /// Reconciler with an injected provider factory.
    pub fn with_provider_factory(store: S, config: FactoryConfig, providers: ProviderFactory) -> Self {
        Self {
            store,
            config,
            workspace_id: "default".to_string(),
            providers,
        }
    }

    /// Override the workspace ID passed to spawned workers.
    pub fn with_workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = workspace_id.into();
        self
    }

    /// Run one reconcile pass with the construction-time configuration.
    pub async fn run_pass(&self) -> Result<ReconcileOutcome, QueueError> {
        self.run_pass_with(ReconcileOverrides::default()).await
    }

    /// Run one reconcile pass, with per-invocation policy overrides.
    ///
    /// Aborts before touching any worker when the provider credential or
    /// the queue endpoint secret is missing.
    pub async fn run_pass_with(
        &self,
        overrides: ReconcileOverrides,
    ) -> Result<ReconcileOutcome, QueueError> {
        let now = now_ms();
        let provider_cfg = overrides
            .provider
            .unwrap_or_else(|| self.config.provider.clone());
        let scaling = overrides
            .scaling
            .unwrap_or_else(|| self.config.scaling.clone());

        let api_token = self
            .store
            .get_secret(SECRET_REF_PROVIDER_TOKEN)
            .await?
            .ok_or_else(|| CoreError::MissingProviderCredential(SECRET_REF_PROVIDER_TOKEN.into()))?;
        let queue_endpoint = self
            .store
            .get_secret(SECRET_REF_QUEUE_ENDPOINT)
            .await?
            .ok_or_else(|| CoreError::MissingEndpoint(SECRET_REF_QUEUE_ENDPOINT.into()))?;

        let provider = (self.providers)(provider_cfg.kind, &api_token, &provider_cfg.app_name)?;

        let live_machine_ids: HashSet<String> = provider
            .list_workers()
            .await?
            .into_iter()
            .map(|machine| machine.machine_id)
            .collect();

        let mut workers = self.store.list_active_workers().await?;
        let mut terminated = 0;

        // Heal drift: directory rows whose machine no longer exists are
        // stopped before any capacity math; their machines need no drain.
        let stale: Vec<WorkerSnapshot> =
            find_stale_workers(&workers, &live_machine_ids, &provider_cfg.app_name)
                .into_iter()
                .cloned()
                .collect();
        for worker in &stale {
            tracing::warn!(
                worker_id = %worker.worker_id,
                machine_id = ?worker.machine_id,
                "worker machine gone at provider, marking stopped"
            );
            self.store
                .upsert_worker_state(&self.stopped_state(&provider_cfg, worker, now), now)
                .await?;
            terminated += 1;
        }
        workers.retain(|w| !stale.iter().any(|s| s.worker_id == w.worker_id));

        let demand = self.store.queue_demand(now).await?;
        let target = plan_capacity(demand, &scaling, provider_cfg.dedicated_volume_mode());
        if target.volume_clamped {
            tracing::warn!(
                ready_conversations = demand.ready_conversations,
                "dedicated volume mode caps the fleet at one worker"
            );
        }

        let active_workers = workers.len() as i32;
        let mut spawned = 0;

        let to_spawn = spawn_count(target.target_active, active_workers, scaling.spawn_step);
        for i in 0..to_spawn {
            let worker_id = format!("afw-{now}-{i}");
            let created = provider
                .spawn_worker(&self.spawn_input(&provider_cfg, &scaling, &worker_id, &queue_endpoint))
                .await?;
            self.store
                .upsert_worker_state(
                    &UpsertWorkerState {
                        worker_id: worker_id.clone(),
                        provider: provider_cfg.kind.as_str().to_string(),
                        status: WorkerStatus::Active,
                        load: 0,
                        scheduled_shutdown_at: Some(now + scaling.idle_timeout_ms),
                        machine_app: Some(provider_cfg.app_name.clone()),
                        machine_id: Some(created.machine_id.clone()),
                        machine_region: created.region.clone(),
                    },
                    now,
                )
                .await?;
            tracing::info!(worker_id, machine_id = %created.machine_id, "spawned worker");
            spawned += 1;
        }

        // Idle-timeout drains: zero-load workers past their deadline.
        let due_idle: Vec<WorkerSnapshot> = due_idle_workers(&workers, now)
            .into_iter()
            .cloned()
            .collect();
        let mut drained_ids: HashSet<String> = HashSet::new();
        for worker in &due_idle {
            if !self
                .drain_worker(provider.as_ref(), worker, &live_machine_ids)
                .await?
            {
                continue;
            }
            self.store
                .upsert_worker_state(&self.stopped_state(&provider_cfg, worker, now), now)
                .await?;
            drained_ids.insert(worker.worker_id.clone());
            terminated += 1;
        }
        workers.retain(|w| !drained_ids.contains(&w.worker_id));

        // Demand-driven drains for whatever excess remains. The count is
        // taken after idle drains (plus this pass's spawns) so workers
        // already removed are not drained against a second time.
        let remaining_active = workers.len() as i32 + spawned;
        let excess: Vec<WorkerSnapshot> = excess_drain_candidates(
            &workers,
            target.target_active,
            remaining_active,
            scaling.spawn_step,
        )
        .into_iter()
        .cloned()
        .collect();
        for worker in &excess {
            if !self
                .drain_worker(provider.as_ref(), worker, &live_machine_ids)
                .await?
            {
                continue;
            }
            self.store
                .upsert_worker_state(&self.stopped_state(&provider_cfg, worker, now), now)
                .await?;
            terminated += 1;
        }

        // Housekeeping, never fatal to the pass.
        if let Err(error) = self.store.expire_stale_snapshots(now).await {
            tracing::warn!(%error, "hydration snapshot expiry failed");
        }

        let outcome = ReconcileOutcome {
            desired_workers: target.target_active,
            active_workers,
            spawned,
            terminated,
            queued_ready: demand.queued_ready,
            ready_conversations: demand.ready_conversations,
        };
        tracing::info!(
            desired = outcome.desired_workers,
            active = outcome.active_workers,
            spawned = outcome.spawned,
            terminated = outcome.terminated,
            queued_ready = outcome.queued_ready,
            backlog_per_worker_target = scaling.queue_per_worker_target,
            "reconcile pass complete"
        );
        Ok(outcome)
    }

    /// Cordon, stop, then destroy a worker's machine.
    ///
    /// Returns `false` when the machine is not yet stoppable; the worker
    /// stays active and the next pass retries. A machine that is already
    /// gone counts as drained.
    async fn drain_worker(
        &self,
        provider: &dyn WorkerProvider,
        worker: &WorkerSnapshot,
        live_machine_ids: &HashSet<String>,
    ) -> Result<bool, QueueError> {
        let Some(machine_id) = worker.machine_id.as_deref() else {
            return Ok(true);
        };
        if !live_machine_ids.contains(machine_id) {
            return Ok(true);
        }

        // Strictly sequential: a later step must not run once an earlier
        // one fails. Stopping is a precondition for destroying, so a
        // deferred stop must leave the machine alive for the next pass.
        if let Some(done) =
            Self::drain_step(provider.cordon_worker(machine_id).await, worker, machine_id)?
        {
            return Ok(done);
        }
        if let Some(done) =
            Self::drain_step(provider.stop_worker(machine_id).await, worker, machine_id)?
        {
            return Ok(done);
        }
        if let Some(done) =
            Self::drain_step(provider.terminate_worker(machine_id).await, worker, machine_id)?
        {
            return Ok(done);
        }
        Ok(true)
    }

    /// Classify one drain step: `None` proceeds to the next step,
    /// `Some(true)` short-circuits as drained (machine already gone),
    /// `Some(false)` defers the whole drain to the next pass.
    fn drain_step(
        result: Result<(), factory_provider::ProviderError>,
        worker: &WorkerSnapshot,
        machine_id: &str,
    ) -> Result<Option<bool>, QueueError> {
        match result {
            Ok(()) => Ok(None),
            Err(error) if error.is_missing_machine() => Ok(Some(true)),
            Err(error) if error.is_retryable_precondition() => {
                tracing::warn!(
                    worker_id = %worker.worker_id,
                    machine_id,
                    %error,
                    "worker termination deferred"
                );
                Ok(Some(false))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn spawn_input(
        &self,
        provider_cfg: &ProviderConfig,
        scaling: &ScalingPolicy,
        worker_id: &str,
        queue_endpoint: &str,
    ) -> SpawnWorkerInput {
        let mut env: BTreeMap<String, String> = DEFAULT_WORKER_RUNTIME_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.insert("QUEUE_ENDPOINT_URL".into(), queue_endpoint.to_string());
        env.insert("WORKSPACE_ID".into(), self.workspace_id.clone());
        env.insert("WORKER_ID".into(), worker_id.to_string());
        env.insert(
            "WORKER_IDLE_TIMEOUT_MS".into(),
            scaling.idle_timeout_ms.to_string(),
        );

        let (volume_name, volume_path) = if provider_cfg.dedicated_volume_mode() {
            (
                Some(provider_cfg.volume_name.clone()),
                Some(provider_cfg.volume_path.clone()),
            )
        } else {
            (None, None)
        };

        SpawnWorkerInput {
            worker_id: worker_id.to_string(),
            image: provider_cfg.image.clone(),
            region: provider_cfg.region.clone(),
            env,
            volume_name,
            volume_path,
            volume_size_gb: provider_cfg.volume_size_gb as i64,
        }
    }

    fn stopped_state(
        &self,
        provider_cfg: &ProviderConfig,
        worker: &WorkerSnapshot,
        now: TimestampMs,
    ) -> UpsertWorkerState {
        UpsertWorkerState {
            worker_id: worker.worker_id.clone(),
            provider: provider_cfg.kind.as_str().to_string(),
            status: WorkerStatus::Stopped,
            load: 0,
            scheduled_shutdown_at: Some(now),
            machine_app: worker
                .app_name
                .clone()
                .or_else(|| Some(provider_cfg.app_name.clone())),
            machine_id: worker.machine_id.clone(),
            machine_region: worker.region.clone(),
        }
    }
}
