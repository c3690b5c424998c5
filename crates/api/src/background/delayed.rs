//! Durable delayed-task pump.
//!
//! The queue engine schedules reconcile nudges and per-worker idle checks
//! as rows in `delayed_tasks`. This loop claims due rows and wakes the
//! reconcile loop; the pass itself re-derives everything, so both task
//! kinds reduce to "run a pass soon". Claiming marks the row completed,
//! which gives at-least-once delivery across process restarts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use factory_db::models::delayed_task::TaskKind;
use factory_db::repositories::delayed_task_repo::DelayedTaskRepo;
use factory_db::DbPool;
use factory_queue::now_ms;

/// How often due tasks are polled.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Rows claimed per poll.
const CLAIM_LIMIT: i64 = 50;

/// Run the delayed-task pump until `cancel` is triggered.
pub async fn run(pool: DbPool, nudge: Arc<Notify>, cancel: CancellationToken) {
    tracing::info!(
        poll_interval_secs = POLL_INTERVAL.as_secs(),
        "Delayed-task pump started"
    );

    let mut interval = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Delayed-task pump stopping");
                break;
            }
            _ = interval.tick() => {
                match DelayedTaskRepo::claim_due(&pool, now_ms(), CLAIM_LIMIT).await {
                    Ok(tasks) if tasks.is_empty() => {}
                    Ok(tasks) => {
                        for task in &tasks {
                            match task.task_kind() {
                                Some(TaskKind::ReconcileNudge) => {
                                    tracing::debug!(task_id = task.id, "Due reconcile nudge");
                                }
                                Some(TaskKind::IdleCheck) => {
                                    tracing::debug!(
                                        task_id = task.id,
                                        worker_id = task.worker_id.as_deref(),
                                        "Due idle check"
                                    );
                                }
                                None => {
                                    tracing::warn!(
                                        task_id = task.id,
                                        kind = %task.kind,
                                        "Skipping delayed task of unknown kind"
                                    );
                                }
                            }
                        }
                        if tasks.iter().any(|t| t.task_kind().is_some()) {
                            nudge.notify_one();
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Delayed-task claim failed");
                    }
                }
            }
        }
    }
}
