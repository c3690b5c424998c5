//! Periodic fleet reconciliation.
//!
//! Runs one reconcile pass per interval tick, and ahead of schedule
//! whenever the nudge is signalled (new work enqueued, delayed task due).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use factory_queue::{PgFleetStore, Reconciler};

/// Run the reconcile loop until `cancel` is triggered.
pub async fn run(
    reconciler: Arc<Reconciler<PgFleetStore>>,
    interval_ms: u64,
    nudge: Arc<Notify>,
    cancel: CancellationToken,
) {
    tracing::info!(interval_ms, "Reconcile loop started");

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconcile loop stopping");
                break;
            }
            _ = interval.tick() => {}
            _ = nudge.notified() => {
                tracing::debug!("Reconcile loop nudged");
            }
        }

        match reconciler.run_pass().await {
            Ok(outcome) => {
                if outcome.spawned > 0 || outcome.terminated > 0 {
                    tracing::info!(
                        spawned = outcome.spawned,
                        terminated = outcome.terminated,
                        desired = outcome.desired_workers,
                        "Reconcile pass changed the fleet"
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Reconcile pass failed");
            }
        }
    }
}
