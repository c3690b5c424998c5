//! Periodic stuck-lease sweep.
//!
//! Reverts processing messages whose lease has expired back to queued so
//! another worker can pick them up.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use factory_queue::QueueEngine;

/// Default sweep cadence in seconds.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(engine: Arc<QueueEngine>, cancel: CancellationToken) {
    let interval_secs: u64 = std::env::var("SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);

    tracing::info!(interval_secs, "Stuck-lease sweep started");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stuck-lease sweep stopping");
                break;
            }
            _ = interval.tick() => {
                match engine.release_stuck(None).await {
                    Ok(outcome) => {
                        if outcome.requeued > 0 || outcome.unlocked > 0 {
                            tracing::info!(
                                requeued = outcome.requeued,
                                unlocked = outcome.unlocked,
                                "Sweep released stuck messages"
                            );
                        } else {
                            tracing::debug!("Sweep found no stuck messages");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Stuck-lease sweep failed");
                    }
                }
            }
        }
    }
}
