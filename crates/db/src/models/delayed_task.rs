//! Durable delayed-task entity models. Tasks survive process restarts and
//! are claimed by the background pump when their run time arrives.

use sqlx::FromRow;

use factory_core::types::{DbId, TimestampMs};

/// Task kinds, stored as TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Ask the reconciler to run a pass soon (new work arrived).
    ReconcileNudge,
    /// Check whether a worker's idle shutdown deadline has elapsed.
    IdleCheck,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::ReconcileNudge => "reconcile_nudge",
            TaskKind::IdleCheck => "idle_check",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reconcile_nudge" => Some(TaskKind::ReconcileNudge),
            "idle_check" => Some(TaskKind::IdleCheck),
            _ => None,
        }
    }
}

/// A row from the `delayed_tasks` table.
#[derive(Debug, Clone, FromRow)]
pub struct DelayedTask {
    pub id: DbId,
    pub kind: String,
    pub run_at: TimestampMs,
    pub worker_id: Option<String>,
    pub completed_at: Option<TimestampMs>,
    pub created_at: TimestampMs,
}

impl DelayedTask {
    pub fn task_kind(&self) -> Option<TaskKind> {
        TaskKind::parse(&self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_round_trips_through_text() {
        for kind in [TaskKind::ReconcileNudge, TaskKind::IdleCheck] {
            assert_eq!(TaskKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TaskKind::parse("unknown"), None);
    }
}
