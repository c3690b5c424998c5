use std::sync::Arc;

use tokio::sync::Notify;

use factory_db::DbPool;
use factory_queue::{PgFleetStore, QueueEngine, Reconciler};

use crate::config::ServerConfig;

/// Shared application state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Postgres connection pool.
    pub pool: DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Message-queue lifecycle operations.
    pub engine: Arc<QueueEngine>,
    /// Fleet reconciler, shared with the periodic background task.
    pub reconciler: Arc<Reconciler<PgFleetStore>>,
    /// Wakes the reconcile loop ahead of its next interval tick.
    pub reconcile_nudge: Arc<Notify>,
}
