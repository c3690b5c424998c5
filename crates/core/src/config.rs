//! Policy configuration for the queue, lease, retry, scaling, and provider
//! subsystems.
//!
//! Policies are immutable-per-call: callers pass an override or fall back to
//! the system-wide defaults below. Nothing here is persisted.

use serde::{Deserialize, Serialize};

use crate::types::TimestampMs;

/// Queue admission policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuePolicy {
    /// Priority assigned when the caller does not specify one.
    pub default_priority: i32,
    /// Upper bound for message priority; values above are clamped.
    pub max_priority: i32,
    /// How many due, queued messages a single claim scans.
    pub claim_batch_size: i64,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            default_priority: 50,
            max_priority: 100,
            claim_batch_size: 25,
        }
    }
}

/// Retry/backoff policy for failed messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after which a message is dead-lettered.
    pub max_attempts: i32,
    pub base_delay_ms: TimestampMs,
    pub max_delay_ms: TimestampMs,
    pub backoff_factor: f64,
    /// Fraction of the bounded delay added as deterministic jitter.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 120_000,
            backoff_factor: 2.0,
            jitter_ratio: 0.1,
        }
    }
}

/// Lease policy governing claim ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeasePolicy {
    /// How long a claim holds a message before the sweep may reclaim it.
    pub lease_ms: TimestampMs,
    /// Interval at which live workers must renew their lease. Must be
    /// well under `lease_ms`.
    pub heartbeat_interval_ms: TimestampMs,
    /// Age past which a worker's directory row is considered stale.
    pub stale_after_ms: TimestampMs,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            lease_ms: 360_000,
            heartbeat_interval_ms: 15_000,
            stale_after_ms: 420_000,
        }
    }
}

/// Elastic worker-pool scaling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingPolicy {
    /// Floor for the active worker count, kept even with zero demand.
    pub min_workers: i32,
    /// Hard ceiling for the active worker count.
    pub max_workers: i32,
    /// Backlog-pressure target: ready messages one worker is expected to
    /// absorb. Surfaced in reconcile telemetry; the binding demand signal
    /// is the ready-conversation count.
    pub queue_per_worker_target: i64,
    /// Maximum spawns (and demand-driven drains) per reconcile pass.
    pub spawn_step: i32,
    /// Idle period after the last claim before a worker is shut down.
    pub idle_timeout_ms: TimestampMs,
    /// Periodic reconcile interval.
    pub reconcile_interval_ms: TimestampMs,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_workers: 0,
            max_workers: 1,
            queue_per_worker_target: 5,
            spawn_step: 1,
            idle_timeout_ms: 120_000,
            reconcile_interval_ms: 15_000,
        }
    }
}

/// Compute backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Fly,
    Runpod,
    Ecs,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Fly => "fly",
            ProviderKind::Runpod => "runpod",
            ProviderKind::Ecs => "ecs",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment configuration for the compute provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Provider app/deployment the worker machines belong to.
    pub app_name: String,
    /// Container image run by spawned workers.
    pub image: String,
    pub region: String,
    /// Volume-name prefix for per-worker dedicated volumes. Empty disables
    /// volume mounting.
    pub volume_name: String,
    /// Mount path inside the worker machine.
    pub volume_path: String,
    pub volume_size_gb: i32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Fly,
            app_name: "agent-factory-workers".into(),
            image: "registry.fly.io/agent-factory-workers:latest".into(),
            region: "iad".into(),
            volume_name: "openclaw_data".into(),
            volume_path: "/data".into(),
            volume_size_gb: 10,
        }
    }
}

impl ProviderConfig {
    /// True when every worker must mount the same named volume, which caps
    /// the fleet at a single worker.
    pub fn dedicated_volume_mode(&self) -> bool {
        !self.volume_name.trim().is_empty() && !self.volume_path.trim().is_empty()
    }
}

/// Full system configuration bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    pub queue: QueuePolicy,
    pub retry: RetryPolicy,
    pub lease: LeasePolicy,
    pub scaling: ScalingPolicy,
    pub provider: ProviderConfig,
}

/// Secret ref resolved to the provider API token during reconcile.
pub const SECRET_REF_PROVIDER_TOKEN: &str = "fly.api_token";

/// Secret ref resolved to the externally reachable queue endpoint URL.
pub const SECRET_REF_QUEUE_ENDPOINT: &str = "queue.endpoint_url";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedicated_volume_mode_requires_name_and_path() {
        let mut cfg = ProviderConfig::default();
        assert!(cfg.dedicated_volume_mode());

        cfg.volume_name = "  ".into();
        assert!(!cfg.dedicated_volume_mode());

        cfg.volume_name = "openclaw_data".into();
        cfg.volume_path = String::new();
        assert!(!cfg.dedicated_volume_mode());
    }

    #[test]
    fn default_policies_are_internally_consistent() {
        let cfg = FactoryConfig::default();
        // A worker must be able to heartbeat several times within one lease.
        assert!(cfg.lease.heartbeat_interval_ms * 4 <= cfg.lease.lease_ms);
        assert!(cfg.retry.base_delay_ms <= cfg.retry.max_delay_ms);
        assert!(cfg.scaling.min_workers <= cfg.scaling.max_workers);
    }
}
