//! Integration tests for the fleet reconciler over an in-memory store and
//! a fake provider.
//!
//! These exercise full passes: secret gating, drift healing, demand-capped
//! scaling, dedicated-volume clamping, idle and excess drains, and the
//! behavior of overlapping passes during a spawn burst.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use factory_core::config::{
    FactoryConfig, ProviderKind, ScalingPolicy, SECRET_REF_PROVIDER_TOKEN,
    SECRET_REF_QUEUE_ENDPOINT,
};
use factory_core::error::CoreError;
use factory_core::plan::{DemandSnapshot, WorkerSnapshot, WorkerState};
use factory_core::types::TimestampMs;
use factory_db::models::status::WorkerStatus;
use factory_db::models::worker::UpsertWorkerState;
use factory_provider::{
    MachineStatus, ProviderError, ProviderWorker, SpawnWorkerInput, SpawnedWorker, WorkerProvider,
};
use factory_queue::{FleetStore, ProviderFactory, QueueError, ReconcileOverrides, Reconciler};

// ---------------------------------------------------------------------------
// In-memory fleet store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct WorkerRecord {
    status: WorkerStatus,
    load: i32,
    heartbeat_at: TimestampMs,
    last_claim_at: Option<TimestampMs>,
    scheduled_shutdown_at: Option<TimestampMs>,
    machine_app: Option<String>,
    machine_id: Option<String>,
    machine_region: Option<String>,
}

#[derive(Default)]
struct MemoryFleetStore {
    secrets: Mutex<HashMap<String, String>>,
    workers: Mutex<HashMap<String, WorkerRecord>>,
    demand: Mutex<DemandSnapshot>,
}

impl MemoryFleetStore {
    fn with_secrets() -> Self {
        let store = Self::default();
        store.put_secret(SECRET_REF_PROVIDER_TOKEN, "fly-token");
        store.put_secret(SECRET_REF_QUEUE_ENDPOINT, "https://queue.example.com");
        store
    }

    fn put_secret(&self, secret_ref: &str, value: &str) {
        self.secrets
            .lock()
            .unwrap()
            .insert(secret_ref.to_string(), value.to_string());
    }

    fn set_demand(&self, queued_ready: i64, ready_conversations: i64) {
        *self.demand.lock().unwrap() = DemandSnapshot {
            queued_ready,
            ready_conversations,
        };
    }

    fn add_active_worker(&self, worker_id: &str, record: WorkerRecord) {
        self.workers
            .lock()
            .unwrap()
            .insert(worker_id.to_string(), record);
    }

    fn active_worker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .workers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.status == WorkerStatus::Active)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn record(&self, worker_id: &str) -> WorkerRecord {
        self.workers.lock().unwrap().get(worker_id).unwrap().clone()
    }
}

fn idle_record(machine_id: &str, app: &str, shutdown_at: Option<TimestampMs>) -> WorkerRecord {
    WorkerRecord {
        status: WorkerStatus::Active,
        load: 0,
        heartbeat_at: 1_000,
        last_claim_at: Some(1_000),
        scheduled_shutdown_at: shutdown_at,
        machine_app: Some(app.to_string()),
        machine_id: Some(machine_id.to_string()),
        machine_region: Some("iad".to_string()),
    }
}

#[async_trait]
impl FleetStore for MemoryFleetStore {
    async fn queue_demand(&self, _now: TimestampMs) -> Result<DemandSnapshot, QueueError> {
        Ok(*self.demand.lock().unwrap())
    }

    async fn list_active_workers(&self) -> Result<Vec<WorkerSnapshot>, QueueError> {
        Ok(self
            .workers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.status == WorkerStatus::Active)
            .map(|(id, r)| WorkerSnapshot {
                worker_id: id.clone(),
                state: WorkerState::Active,
                load: r.load,
                heartbeat_at: r.heartbeat_at,
                last_claim_at: r.last_claim_at,
                scheduled_shutdown_at: r.scheduled_shutdown_at,
                machine_id: r.machine_id.clone(),
                app_name: r.machine_app.clone(),
                region: r.machine_region.clone(),
            })
            .collect())
    }

    async fn upsert_worker_state(
        &self,
        update: &UpsertWorkerState,
        now: TimestampMs,
    ) -> Result<(), QueueError> {
        self.workers.lock().unwrap().insert(
            update.worker_id.clone(),
            WorkerRecord {
                status: update.status,
                load: update.load,
                heartbeat_at: now,
                last_claim_at: None,
                scheduled_shutdown_at: update.scheduled_shutdown_at,
                machine_app: update.machine_app.clone(),
                machine_id: update.machine_id.clone(),
                machine_region: update.machine_region.clone(),
            },
        );
        Ok(())
    }

    async fn get_secret(&self, secret_ref: &str) -> Result<Option<String>, QueueError> {
        Ok(self.secrets.lock().unwrap().get(secret_ref).cloned())
    }

    async fn expire_stale_snapshots(&self, _now: TimestampMs) -> Result<u64, QueueError> {
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Fake provider
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeProvider {
    machines: Mutex<HashMap<String, ProviderWorker>>,
    calls: Mutex<Vec<String>>,
    spawn_envs: Mutex<Vec<BTreeMap<String, String>>>,
    /// When set, `stop_worker` fails with this Fly-style API error body.
    stop_error_body: Mutex<Option<String>>,
}

impl FakeProvider {
    fn with_machine(self, machine_id: &str) -> Self {
        self.machines.lock().unwrap().insert(
            machine_id.to_string(),
            ProviderWorker {
                machine_id: machine_id.to_string(),
                status: MachineStatus::Active,
                region: Some("iad".to_string()),
                private_ip: None,
            },
        );
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn machine_ids(&self) -> HashSet<String> {
        self.machines.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl WorkerProvider for FakeProvider {
    async fn spawn_worker(&self, input: &SpawnWorkerInput) -> Result<SpawnedWorker, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("spawn:{}", input.worker_id));
        self.spawn_envs.lock().unwrap().push(input.env.clone());

        // Idempotent by worker name, as Fly machines are.
        let machine_id = format!("machine-{}", input.worker_id);
        self.machines.lock().unwrap().insert(
            machine_id.clone(),
            ProviderWorker {
                machine_id: machine_id.clone(),
                status: MachineStatus::Starting,
                region: Some(input.region.clone()),
                private_ip: None,
            },
        );
        Ok(SpawnedWorker {
            machine_id,
            region: Some(input.region.clone()),
        })
    }

    async fn list_workers(&self) -> Result<Vec<ProviderWorker>, ProviderError> {
        Ok(self.machines.lock().unwrap().values().cloned().collect())
    }

    async fn cordon_worker(&self, machine_id: &str) -> Result<(), ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("cordon:{machine_id}"));
        Ok(())
    }

    async fn stop_worker(&self, machine_id: &str) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(format!("stop:{machine_id}"));
        if let Some(body) = self.stop_error_body.lock().unwrap().clone() {
            return Err(ProviderError::Api { status: 409, body });
        }
        Ok(())
    }

    async fn terminate_worker(&self, machine_id: &str) -> Result<(), ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("terminate:{machine_id}"));
        self.machines.lock().unwrap().remove(machine_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn test_config(min: i32, max: i32, spawn_step: i32, dedicated_volume: bool) -> FactoryConfig {
    let mut config = FactoryConfig {
        scaling: ScalingPolicy {
            min_workers: min,
            max_workers: max,
            spawn_step,
            ..ScalingPolicy::default()
        },
        ..FactoryConfig::default()
    };
    if !dedicated_volume {
        config.provider.volume_name = String::new();
        config.provider.volume_path = String::new();
    }
    config
}

fn reconciler(
    store: Arc<MemoryFleetStore>,
    provider: Arc<FakeProvider>,
    config: FactoryConfig,
) -> Reconciler<Arc<MemoryFleetStore>> {
    let factory: ProviderFactory =
        Box::new(move |_, _, _| Ok(provider.clone() as Arc<dyn WorkerProvider>));
    Reconciler::with_provider_factory(store, config, factory)
}

// ---------------------------------------------------------------------------
// Test: secret gating
// ---------------------------------------------------------------------------

/// A missing provider token aborts the pass before any provider call.
#[tokio::test]
async fn missing_provider_credential_aborts_pass() {
    let store = Arc::new(MemoryFleetStore::default());
    store.put_secret(SECRET_REF_QUEUE_ENDPOINT, "https://queue.example.com");
    let provider = Arc::new(FakeProvider::default());
    let r = reconciler(store, provider.clone(), test_config(0, 3, 2, false));

    let error = r.run_pass().await.unwrap_err();
    assert!(matches!(
        error,
        QueueError::Core(CoreError::MissingProviderCredential(_))
    ));
    assert!(provider.calls().is_empty());
}

/// A missing queue endpoint likewise aborts the pass.
#[tokio::test]
async fn missing_queue_endpoint_aborts_pass() {
    let store = Arc::new(MemoryFleetStore::default());
    store.put_secret(SECRET_REF_PROVIDER_TOKEN, "fly-token");
    let provider = Arc::new(FakeProvider::default());
    let r = reconciler(store, provider.clone(), test_config(0, 3, 2, false));

    let error = r.run_pass().await.unwrap_err();
    assert!(matches!(
        error,
        QueueError::Core(CoreError::MissingEndpoint(_))
    ));
    assert!(provider.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Test: demand-capped scaling
// ---------------------------------------------------------------------------

/// Three ready conversations with room in the fleet spawn three workers,
/// each carrying the queue endpoint and its own ID in the machine env.
#[tokio::test]
async fn scales_up_to_ready_conversations() {
    let store = Arc::new(MemoryFleetStore::with_secrets());
    store.set_demand(40, 3);
    let provider = Arc::new(FakeProvider::default());
    let r = reconciler(store.clone(), provider.clone(), test_config(0, 5, 5, false));

    let outcome = r.run_pass().await.unwrap();
    assert_eq!(outcome.desired_workers, 3);
    assert_eq!(outcome.spawned, 3);
    assert_eq!(outcome.terminated, 0);
    assert_eq!(store.active_worker_ids().len(), 3);

    let envs = provider.spawn_envs.lock().unwrap().clone();
    assert_eq!(envs.len(), 3);
    for env in &envs {
        assert_eq!(
            env.get("QUEUE_ENDPOINT_URL").map(String::as_str),
            Some("https://queue.example.com")
        );
        assert!(env.contains_key("WORKER_ID"));
        assert!(env.contains_key("WORKER_IDLE_TIMEOUT_MS"));
    }

    // Fresh spawns are pre-armed for idle shutdown.
    for worker_id in store.active_worker_ids() {
        assert!(store.record(&worker_id).scheduled_shutdown_at.is_some());
    }
}

/// Spawning is bounded by `spawn_step` per pass even when demand is higher.
#[tokio::test]
async fn spawns_are_step_limited() {
    let store = Arc::new(MemoryFleetStore::with_secrets());
    store.set_demand(50, 5);
    let provider = Arc::new(FakeProvider::default());
    let r = reconciler(store.clone(), provider, test_config(0, 5, 2, false));

    let outcome = r.run_pass().await.unwrap();
    assert_eq!(outcome.desired_workers, 5);
    assert_eq!(outcome.spawned, 2);
    assert_eq!(store.active_worker_ids().len(), 2);
}

/// Dedicated-volume mode clamps the fleet to a single worker no matter
/// the demand.
#[tokio::test]
async fn dedicated_volume_mode_clamps_to_one_worker() {
    let store = Arc::new(MemoryFleetStore::with_secrets());
    store.set_demand(12, 4);
    let provider = Arc::new(FakeProvider::default());
    let r = reconciler(store.clone(), provider.clone(), test_config(0, 5, 5, true));

    let outcome = r.run_pass().await.unwrap();
    assert_eq!(outcome.desired_workers, 1);
    assert_eq!(outcome.spawned, 1);
    assert_eq!(store.active_worker_ids().len(), 1);

    // The spawn asked for the dedicated volume mount.
    let calls = provider.calls();
    assert!(calls.iter().any(|c| c.starts_with("spawn:afw-")));
}

// ---------------------------------------------------------------------------
// Test: drift healing
// ---------------------------------------------------------------------------

/// Directory rows whose machine vanished at the provider are marked
/// stopped without any drain calls, and count as terminated.
#[tokio::test]
async fn heals_drift_without_terminating_again() {
    let store = Arc::new(MemoryFleetStore::with_secrets());
    store.add_active_worker(
        "afw-1-0",
        idle_record("machine-gone", "agent-factory-workers", Some(i64::MAX)),
    );
    let provider = Arc::new(FakeProvider::default());
    let r = reconciler(store.clone(), provider.clone(), test_config(0, 3, 2, false));

    let outcome = r.run_pass().await.unwrap();
    assert_eq!(outcome.terminated, 1);
    assert_eq!(store.record("afw-1-0").status, WorkerStatus::Stopped);
    // No cordon/stop/terminate for a machine that is already gone.
    assert!(provider.calls().iter().all(|c| c.starts_with("spawn:")) || provider.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Test: drains
// ---------------------------------------------------------------------------

/// An idle worker past its shutdown deadline is drained
/// cordon → stop → terminate and marked stopped.
#[tokio::test]
async fn idle_timeout_drains_run_full_sequence() {
    let store = Arc::new(MemoryFleetStore::with_secrets());
    store.add_active_worker(
        "afw-1-0",
        idle_record("machine-a", "agent-factory-workers", Some(1)),
    );
    let provider = Arc::new(FakeProvider::default().with_machine("machine-a"));
    let r = reconciler(store.clone(), provider.clone(), test_config(0, 3, 2, false));

    let outcome = r.run_pass().await.unwrap();
    assert_eq!(outcome.terminated, 1);
    assert_eq!(store.record("afw-1-0").status, WorkerStatus::Stopped);
    assert_eq!(
        provider.calls(),
        vec![
            "cordon:machine-a".to_string(),
            "stop:machine-a".to_string(),
            "terminate:machine-a".to_string(),
        ]
    );
    assert!(provider.machine_ids().is_empty());
}

/// With three active idle workers and one ready conversation, the pass
/// drains toward the target, bounded by `spawn_step`.
#[tokio::test]
async fn excess_workers_drain_toward_target() {
    let store = Arc::new(MemoryFleetStore::with_secrets());
    store.set_demand(5, 1);
    for (i, machine) in ["machine-a", "machine-b", "machine-c"].iter().enumerate() {
        store.add_active_worker(
            &format!("afw-1-{i}"),
            idle_record(machine, "agent-factory-workers", Some(i64::MAX)),
        );
    }
    let provider = Arc::new(
        FakeProvider::default()
            .with_machine("machine-a")
            .with_machine("machine-b")
            .with_machine("machine-c"),
    );
    let r = reconciler(store.clone(), provider, test_config(0, 5, 2, false));

    let outcome = r.run_pass().await.unwrap();
    assert_eq!(outcome.desired_workers, 1);
    assert_eq!(outcome.spawned, 0);
    assert_eq!(outcome.terminated, 2);
    assert_eq!(store.active_worker_ids().len(), 1);
}

/// Idle-timeout drains count toward the target: with four idle workers,
/// two of them past their shutdown deadline, and a target of two, the
/// pass drains exactly the two due workers and nothing more.
#[tokio::test]
async fn excess_drain_accounts_for_idle_drains() {
    let store = Arc::new(MemoryFleetStore::with_secrets());
    store.set_demand(8, 2);
    let mut provider = FakeProvider::default();
    for (i, machine) in ["machine-a", "machine-b", "machine-c", "machine-d"]
        .iter()
        .enumerate()
    {
        // The first two are past their idle deadline.
        let shutdown_at = if i < 2 { Some(1) } else { Some(i64::MAX) };
        store.add_active_worker(
            &format!("afw-1-{i}"),
            idle_record(machine, "agent-factory-workers", shutdown_at),
        );
        provider = provider.with_machine(machine);
    }
    let r = reconciler(store.clone(), Arc::new(provider), test_config(0, 5, 4, false));

    let outcome = r.run_pass().await.unwrap();
    assert_eq!(outcome.desired_workers, 2);
    assert_eq!(outcome.terminated, 2);
    assert_eq!(store.active_worker_ids(), vec!["afw-1-2", "afw-1-3"]);
}

/// A precondition error during stop defers the drain: the worker stays
/// active and nothing is marked stopped.
#[tokio::test]
async fn precondition_failure_defers_termination() {
    let store = Arc::new(MemoryFleetStore::with_secrets());
    store.add_active_worker(
        "afw-1-0",
        idle_record("machine-a", "agent-factory-workers", Some(1)),
    );
    let provider = Arc::new(FakeProvider::default().with_machine("machine-a"));
    *provider.stop_error_body.lock().unwrap() =
        Some("unable to destroy machine, not currently stopped".to_string());
    let r = reconciler(store.clone(), provider.clone(), test_config(0, 3, 2, false));

    let outcome = r.run_pass().await.unwrap();
    assert_eq!(outcome.terminated, 0);
    assert_eq!(store.record("afw-1-0").status, WorkerStatus::Active);
    assert!(provider.machine_ids().contains("machine-a"));
    // The failed stop must short-circuit the sequence: no terminate call.
    assert_eq!(
        provider.calls(),
        vec!["cordon:machine-a".to_string(), "stop:machine-a".to_string()]
    );
}

// ---------------------------------------------------------------------------
// Test: per-invocation overrides
// ---------------------------------------------------------------------------

/// A scaling-policy override applies for that pass only; the next plain
/// pass falls back to the construction-time policy.
#[tokio::test]
async fn scaling_override_applies_for_one_pass() {
    let store = Arc::new(MemoryFleetStore::with_secrets());
    store.set_demand(10, 3);
    let provider = Arc::new(FakeProvider::default());
    let r = reconciler(store.clone(), provider, test_config(0, 1, 1, false));

    let boosted = r
        .run_pass_with(ReconcileOverrides {
            scaling: Some(ScalingPolicy {
                min_workers: 0,
                max_workers: 3,
                spawn_step: 3,
                ..ScalingPolicy::default()
            }),
            provider: None,
        })
        .await
        .unwrap();
    assert_eq!(boosted.desired_workers, 3);
    assert_eq!(boosted.spawned, 3);

    // Without the override the base policy caps the target at one again.
    let plain = r.run_pass().await.unwrap();
    assert_eq!(plain.desired_workers, 1);
    assert_eq!(plain.spawned, 0);
}

// ---------------------------------------------------------------------------
// Test: overlapping passes
// ---------------------------------------------------------------------------

/// Back-to-back passes during a spawn burst never exceed the target:
/// the second pass sees the first pass's workers and spawns nothing.
#[tokio::test]
async fn repeated_passes_do_not_overshoot_target() {
    let store = Arc::new(MemoryFleetStore::with_secrets());
    store.set_demand(20, 2);
    let provider = Arc::new(FakeProvider::default());
    let config = test_config(0, 5, 5, false);
    let first = reconciler(store.clone(), provider.clone(), config.clone());
    let second = reconciler(store.clone(), provider.clone(), config);

    let a = first.run_pass().await.unwrap();
    let b = second.run_pass().await.unwrap();

    assert_eq!(a.spawned + b.spawned, 2);
    assert_eq!(store.active_worker_ids().len(), 2);
    // The provider holds exactly one machine per live worker.
    assert_eq!(provider.machine_ids().len(), 2);
}
