pub mod health;

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /queue/messages                      POST enqueue, GET list by status
/// /queue/messages/{id}/heartbeat       renew a claim lease
/// /queue/messages/{id}/complete        finish an owned message
/// /queue/messages/{id}/fail            record a failed attempt
/// /queue/claim                         claim the next eligible message
/// /queue/stats                         queue + fleet counters
/// /queue/sweep                         force a stuck-lease sweep
///
/// /workers/stats                       fleet statistics
/// /workers/reconcile                   run one reconcile pass now
///
/// /admin/agents                        PUT upsert, GET list
/// /admin/agents/{agent_key}            GET one profile
/// /admin/secrets                       POST import a secret version
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/queue/messages",
            post(handlers::queue::enqueue).get(handlers::queue::list_messages),
        )
        .route(
            "/queue/messages/{id}/heartbeat",
            post(handlers::queue::heartbeat),
        )
        .route(
            "/queue/messages/{id}/complete",
            post(handlers::queue::complete),
        )
        .route("/queue/messages/{id}/fail", post(handlers::queue::fail))
        .route("/queue/claim", post(handlers::queue::claim))
        .route("/queue/stats", get(handlers::queue::stats))
        .route("/queue/sweep", post(handlers::queue::sweep))
        .route("/workers/stats", get(handlers::workers::fleet_stats))
        .route("/workers/reconcile", post(handlers::workers::reconcile))
        .route(
            "/admin/agents",
            put(handlers::admin::upsert_agent).get(handlers::admin::list_agents),
        )
        .route("/admin/agents/{agent_key}", get(handlers::admin::get_agent))
        .route("/admin/secrets", post(handlers::admin::import_secret))
}
