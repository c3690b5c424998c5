//! Worker runtime: claims messages from the queue API, forwards them to
//! the local agent gateway, and reports the outcome.
//!
//! One message at a time. A heartbeat ticker keeps the lease alive while
//! the gateway works; a lost lease abandons the message without reporting,
//! since another worker may already own it. After the idle timeout passes
//! with no work the process exits and lets the reconciler reap the machine.

mod client;

use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use factory_db::models::message::ClaimedJob;

use client::{GatewayClient, QueueClient};

/// Pause between empty claim attempts.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct WorkerConfig {
    worker_id: String,
    queue_endpoint_url: String,
    gateway_url: String,
    idle_timeout_ms: i64,
    heartbeat_interval_ms: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// `WORKER_ID` and `QUEUE_ENDPOINT_URL` are injected by the reconciler
    /// at spawn time and are required.
    fn from_env() -> anyhow::Result<Self> {
        let worker_id = std::env::var("WORKER_ID").context("WORKER_ID must be set")?;
        let queue_endpoint_url =
            std::env::var("QUEUE_ENDPOINT_URL").context("QUEUE_ENDPOINT_URL must be set")?;
        let gateway_url = std::env::var("AGENT_GATEWAY_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:18789".into());
        let idle_timeout_ms: i64 = std::env::var("WORKER_IDLE_TIMEOUT_MS")
            .unwrap_or_else(|_| "120000".into())
            .parse()
            .context("WORKER_IDLE_TIMEOUT_MS must be a valid i64")?;
        let heartbeat_interval_ms: u64 = std::env::var("HEARTBEAT_INTERVAL_MS")
            .unwrap_or_else(|_| "15000".into())
            .parse()
            .context("HEARTBEAT_INTERVAL_MS must be a valid u64")?;

        Ok(Self {
            worker_id,
            queue_endpoint_url,
            gateway_url,
            idle_timeout_ms,
            heartbeat_interval_ms,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "factory_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        worker_id = %config.worker_id,
        queue = %config.queue_endpoint_url,
        gateway = %config.gateway_url,
        idle_timeout_ms = config.idle_timeout_ms,
        "Worker starting"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;
    let queue = QueueClient::new(
        http.clone(),
        config.queue_endpoint_url.clone(),
        config.worker_id.clone(),
    );
    // The gateway can hold a turn open for minutes; no client-side timeout.
    let gateway_http = reqwest::Client::builder()
        .build()
        .context("failed to build gateway HTTP client")?;
    let gateway = GatewayClient::new(gateway_http, config.gateway_url.clone());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal");
            shutdown.cancel();
        });
    }

    run_claim_loop(&config, &queue, &gateway, &shutdown).await;

    tracing::info!("Worker stopped");
    Ok(())
}

/// Claim/process until shutdown or the idle timeout elapses.
async fn run_claim_loop(
    config: &WorkerConfig,
    queue: &QueueClient,
    gateway: &GatewayClient,
    shutdown: &CancellationToken,
) {
    let mut last_activity = std::time::Instant::now();
    let idle_timeout = Duration::from_millis(config.idle_timeout_ms.max(0) as u64);

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        if last_activity.elapsed() >= idle_timeout {
            tracing::info!(
                idle_ms = last_activity.elapsed().as_millis() as u64,
                "Idle timeout reached, exiting"
            );
            break;
        }

        match queue.claim().await {
            Ok(Some(job)) => {
                process_job(config, queue, gateway, &job).await;
                last_activity = std::time::Instant::now();
            }
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Claim failed, backing off");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(POLL_INTERVAL * 2) => {}
                }
            }
        }
    }
}

/// Deliver one claimed message to the gateway under a live lease.
async fn process_job(
    config: &WorkerConfig,
    queue: &QueueClient,
    gateway: &GatewayClient,
    job: &ClaimedJob,
) {
    tracing::info!(
        message_id = job.message_id,
        conversation_id = %job.conversation_id,
        agent_key = %job.agent_key,
        "Processing message"
    );

    let lease_lost = CancellationToken::new();
    let heartbeat_handle = {
        let queue = queue.clone();
        let job = job.clone();
        let lease_lost = lease_lost.clone();
        let interval_ms = config.heartbeat_interval_ms.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            // The first tick fires immediately; skip it, we just claimed.
            interval.tick().await;
            loop {
                interval.tick().await;
                match queue.heartbeat(&job).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(message_id = job.message_id, "Lease lost");
                        lease_lost.cancel();
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(message_id = job.message_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        })
    };

    let result = tokio::select! {
        _ = lease_lost.cancelled() => {
            heartbeat_handle.abort();
            tracing::warn!(message_id = job.message_id, "Abandoning message after lost lease");
            return;
        }
        result = gateway.deliver(job) => result,
    };
    heartbeat_handle.abort();

    match result {
        Ok(()) => match queue.complete(job).await {
            Ok(true) => {
                tracing::info!(message_id = job.message_id, "Message completed");
            }
            Ok(false) => {
                tracing::warn!(message_id = job.message_id, "Lease lost before completion");
            }
            Err(e) => {
                tracing::error!(message_id = job.message_id, error = %e, "Complete call failed");
            }
        },
        Err(e) => {
            tracing::warn!(message_id = job.message_id, error = %e, "Gateway delivery failed");
            if let Err(report_err) = queue.fail(job, &e.to_string()).await {
                tracing::error!(
                    message_id = job.message_id,
                    error = %report_err,
                    "Fail call failed"
                );
            }
        }
    }
}
