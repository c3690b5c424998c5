//! Compute-provider abstraction for the worker fleet.
//!
//! The reconciler drives the fleet exclusively through the
//! [`WorkerProvider`] trait; the Fly Machines implementation lives in
//! [`fly`], and tests substitute an in-memory fake.

use std::collections::BTreeMap;

use async_trait::async_trait;

pub mod error;
pub mod fly;
pub mod volume;

pub use error::ProviderError;
pub use fly::FlyMachinesProvider;

/// Lifecycle state of a provider machine, normalized across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    Starting,
    Active,
    Idle,
    Draining,
    Stopped,
    Failed,
}

/// A machine as reported by the provider's live list.
#[derive(Debug, Clone)]
pub struct ProviderWorker {
    pub machine_id: String,
    pub status: MachineStatus,
    pub region: Option<String>,
    pub private_ip: Option<String>,
}

/// Everything a provider needs to boot one worker machine.
#[derive(Debug, Clone)]
pub struct SpawnWorkerInput {
    /// Control-plane worker ID, passed to the machine as `WORKER_ID`.
    pub worker_id: String,
    pub image: String,
    pub region: String,
    /// Environment map merged over the image defaults.
    pub env: BTreeMap<String, String>,
    /// Volume to mount at `volume_path`, if the deployment uses one.
    pub volume_name: Option<String>,
    pub volume_path: Option<String>,
    pub volume_size_gb: i64,
}

/// A machine the provider created or adopted for us.
#[derive(Debug, Clone)]
pub struct SpawnedWorker {
    pub machine_id: String,
    pub region: Option<String>,
}

/// Capability set the reconciler needs from a compute provider.
///
/// Implementations must be tolerant of repeated calls: the reconciler
/// retries failed passes and may ask to drain a machine that is already
/// gone.
#[async_trait]
pub trait WorkerProvider: Send + Sync {
    /// Create one worker machine.
    async fn spawn_worker(&self, input: &SpawnWorkerInput) -> Result<SpawnedWorker, ProviderError>;

    /// List all machines in the provider app, whatever their state.
    async fn list_workers(&self) -> Result<Vec<ProviderWorker>, ProviderError>;

    /// Stop routing new work to a machine. Advisory for providers
    /// without a native cordon.
    async fn cordon_worker(&self, machine_id: &str) -> Result<(), ProviderError>;

    /// Stop a running machine.
    async fn stop_worker(&self, machine_id: &str) -> Result<(), ProviderError>;

    /// Destroy a machine and its attached resources.
    async fn terminate_worker(&self, machine_id: &str) -> Result<(), ProviderError>;
}
