//! Queue engine and fleet reconciler.
//!
//! [`engine::QueueEngine`] owns the message lifecycle (enqueue, claim,
//! heartbeat, complete, fail, stuck-lease sweep), each operation one
//! Postgres transaction. [`reconciler::Reconciler`] converges the worker
//! fleet toward queue demand through the [`fleet::FleetStore`] and
//! `WorkerProvider` seams.

use factory_core::types::TimestampMs;

pub mod engine;
pub mod error;
pub mod fleet;
pub mod reconciler;

pub use engine::{QueueEngine, SweepOutcome};
pub use error::QueueError;
pub use fleet::{FleetStore, PgFleetStore};
pub use reconciler::{ProviderFactory, ReconcileOutcome, ReconcileOverrides, Reconciler};

/// Current wall-clock time in epoch milliseconds. All queue arithmetic is
/// integer millisecond math on this value.
pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}
