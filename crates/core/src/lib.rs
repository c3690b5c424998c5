//! Pure domain layer for the agent-factory queue and worker pool.
//!
//! Everything in this crate is deterministic and free of I/O so the queue
//! engine's state machine and the reconciler's capacity math can be tested
//! without a database or a compute provider. Zero internal dependencies.

pub mod config;
pub mod error;
pub mod plan;
pub mod queue;
pub mod retry;
pub mod types;
