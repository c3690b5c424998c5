//! Queue-layer error type.

use factory_core::error::CoreError;
use factory_provider::ProviderError;

/// Errors surfaced by the queue engine and reconciler.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
