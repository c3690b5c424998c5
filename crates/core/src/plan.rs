//! Pure reconcile planning: capacity targets, drift detection, and drain
//! selection.
//!
//! The reconciler gathers a snapshot of the worker directory plus the
//! provider's live machine list, and these functions turn that snapshot
//! into decisions. Re-derived from scratch every pass; nothing here holds
//! state.

use std::collections::HashSet;

use crate::config::ScalingPolicy;
use crate::types::TimestampMs;

/// Directory state of one worker, as seen at the start of a reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    pub state: WorkerState,
    pub load: i32,
    pub heartbeat_at: TimestampMs,
    pub last_claim_at: Option<TimestampMs>,
    pub scheduled_shutdown_at: Option<TimestampMs>,
    pub machine_id: Option<String>,
    pub app_name: Option<String>,
    pub region: Option<String>,
}

/// A worker is either accepting claims or it is gone. Draining is an
/// internal provider-call sequence, not a visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Active,
    Stopped,
}

impl WorkerSnapshot {
    fn is_active(&self) -> bool {
        self.state == WorkerState::Active
    }

    fn is_idle(&self) -> bool {
        self.is_active() && self.load == 0
    }
}

/// Demand read from the queue at the start of a pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemandSnapshot {
    /// Queued messages whose scheduled time has arrived.
    pub queued_ready: i64,
    /// Distinct conversations holding a due, queued message and not
    /// currently locked. This is the binding demand signal: a backlog
    /// piled up in one conversation needs exactly one worker.
    pub ready_conversations: i64,
}

/// Capacity decision for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityTarget {
    pub target_active: i32,
    /// True when dedicated-volume mode forced the target below demand.
    pub volume_clamped: bool,
}

/// Compute the number of workers this pass should converge toward.
///
/// `clamp(ready_conversations, min_workers, max_workers)`, further capped
/// to 1 in dedicated-volume mode since all workers would contend for the
/// same volume.
pub fn plan_capacity(
    demand: DemandSnapshot,
    scaling: &ScalingPolicy,
    dedicated_volume_mode: bool,
) -> CapacityTarget {
    let by_demand = (demand.ready_conversations.min(i32::MAX as i64) as i32)
        .clamp(scaling.min_workers, scaling.max_workers);
    if dedicated_volume_mode && by_demand > 1 {
        CapacityTarget {
            target_active: 1,
            volume_clamped: true,
        }
    } else {
        CapacityTarget {
            target_active: by_demand,
            volume_clamped: false,
        }
    }
}

/// How many workers to spawn this pass: bounded by `spawn_step` and never
/// past the target.
pub fn spawn_count(target_active: i32, current_active: i32, spawn_step: i32) -> i32 {
    (target_active - current_active).clamp(0, spawn_step)
}

/// Workers whose recorded machine no longer exists at the provider.
///
/// Only workers carrying a machine ref for this app are considered; the
/// provider's live list is authoritative, so these must be marked stopped
/// before any capacity math runs.
pub fn find_stale_workers<'a>(
    workers: &'a [WorkerSnapshot],
    live_machine_ids: &HashSet<String>,
    app_name: &str,
) -> Vec<&'a WorkerSnapshot> {
    workers
        .iter()
        .filter(|w| {
            w.app_name.as_deref().map_or(true, |app| app == app_name)
                && w.machine_id
                    .as_ref()
                    .is_some_and(|id| !live_machine_ids.contains(id))
        })
        .collect()
}

/// Active zero-load workers whose idle shutdown deadline has elapsed,
/// soonest deadline first.
pub fn due_idle_workers<'a>(
    workers: &'a [WorkerSnapshot],
    now_ms: TimestampMs,
) -> Vec<&'a WorkerSnapshot> {
    let mut due: Vec<&WorkerSnapshot> = workers
        .iter()
        .filter(|w| {
            w.is_idle()
                && w.scheduled_shutdown_at
                    .is_some_and(|deadline| deadline <= now_ms)
        })
        .collect();
    due.sort_by_key(|w| w.scheduled_shutdown_at);
    due
}

/// Zero-load workers to drain when the fleet exceeds the target beyond
/// what the idle sweep already removed: oldest heartbeat first, at most
/// `spawn_step` per pass.
pub fn excess_drain_candidates<'a>(
    workers: &'a [WorkerSnapshot],
    target_active: i32,
    current_active: i32,
    spawn_step: i32,
) -> Vec<&'a WorkerSnapshot> {
    let excess = (current_active - target_active).clamp(0, spawn_step) as usize;
    if excess == 0 {
        return Vec::new();
    }
    let mut idle: Vec<&WorkerSnapshot> = workers.iter().filter(|w| w.is_idle()).collect();
    idle.sort_by_key(|w| w.heartbeat_at);
    idle.truncate(excess);
    idle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str, state: WorkerState, load: i32) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: id.into(),
            state,
            load,
            heartbeat_at: 0,
            last_claim_at: None,
            scheduled_shutdown_at: None,
            machine_id: None,
            app_name: None,
            region: None,
        }
    }

    fn scaling(min: i32, max: i32) -> ScalingPolicy {
        ScalingPolicy {
            min_workers: min,
            max_workers: max,
            spawn_step: 2,
            ..ScalingPolicy::default()
        }
    }

    #[test]
    fn capacity_follows_ready_conversations_not_message_count() {
        // Many messages in two conversations still means two workers.
        let demand = DemandSnapshot {
            queued_ready: 40,
            ready_conversations: 2,
        };
        let target = plan_capacity(demand, &scaling(0, 5), false);
        assert_eq!(target.target_active, 2);
        assert!(!target.volume_clamped);
    }

    #[test]
    fn capacity_is_clamped_to_max_workers() {
        let demand = DemandSnapshot {
            queued_ready: 100,
            ready_conversations: 9,
        };
        assert_eq!(plan_capacity(demand, &scaling(0, 3), false).target_active, 3);
    }

    #[test]
    fn capacity_respects_min_workers_floor() {
        let demand = DemandSnapshot::default();
        assert_eq!(plan_capacity(demand, &scaling(1, 5), false).target_active, 1);
    }

    #[test]
    fn dedicated_volume_mode_caps_capacity_at_one() {
        let demand = DemandSnapshot {
            queued_ready: 12,
            ready_conversations: 4,
        };
        let target = plan_capacity(demand, &scaling(0, 5), true);
        assert_eq!(target.target_active, 1);
        assert!(target.volume_clamped);

        // No warning when demand already fits under the cap.
        let low = DemandSnapshot {
            queued_ready: 1,
            ready_conversations: 1,
        };
        let target = plan_capacity(low, &scaling(0, 5), true);
        assert_eq!(target.target_active, 1);
        assert!(!target.volume_clamped);
    }

    #[test]
    fn spawn_count_is_step_limited_and_never_overshoots() {
        assert_eq!(spawn_count(5, 0, 2), 2);
        assert_eq!(spawn_count(1, 0, 2), 1);
        assert_eq!(spawn_count(2, 3, 2), 0);
    }

    #[test]
    fn stale_workers_are_those_with_unknown_machines() {
        let mut with_machine = worker("w1", WorkerState::Active, 0);
        with_machine.machine_id = Some("m1".into());
        with_machine.app_name = Some("app".into());
        let mut gone = worker("w2", WorkerState::Active, 1);
        gone.machine_id = Some("m2".into());
        gone.app_name = Some("app".into());
        let no_machine = worker("w3", WorkerState::Active, 0);

        let live: HashSet<String> = ["m1".to_string()].into_iter().collect();
        let workers = vec![with_machine, gone, no_machine];
        let stale = find_stale_workers(&workers, &live, "app");
        let ids: Vec<&str> = stale.iter().map(|w| w.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["w2"]);
    }

    #[test]
    fn stale_check_skips_other_apps() {
        let mut other_app = worker("w1", WorkerState::Active, 0);
        other_app.machine_id = Some("m9".into());
        other_app.app_name = Some("other".into());
        let workers = vec![other_app];
        assert!(find_stale_workers(&workers, &HashSet::new(), "app").is_empty());
    }

    #[test]
    fn due_idle_workers_excludes_busy_and_unarmed() {
        let mut due = worker("due", WorkerState::Active, 0);
        due.scheduled_shutdown_at = Some(1_000);
        let mut later = worker("later", WorkerState::Active, 0);
        later.scheduled_shutdown_at = Some(5_000);
        let mut busy = worker("busy", WorkerState::Active, 1);
        busy.scheduled_shutdown_at = Some(500);
        let unarmed = worker("unarmed", WorkerState::Active, 0);

        let workers = vec![later.clone(), due, busy, unarmed];
        let result = due_idle_workers(&workers, 1_000);
        let ids: Vec<&str> = result.iter().map(|w| w.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["due"]);

        let result = due_idle_workers(&workers, 10_000);
        let ids: Vec<&str> = result.iter().map(|w| w.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["due", "later"]);
    }

    #[test]
    fn excess_drain_picks_oldest_heartbeat_idle_workers() {
        let mut a = worker("a", WorkerState::Active, 0);
        a.heartbeat_at = 300;
        let mut b = worker("b", WorkerState::Active, 0);
        b.heartbeat_at = 100;
        let mut c = worker("c", WorkerState::Active, 1);
        c.heartbeat_at = 50;

        // 3 active, target 1: drain up to spawn_step idle workers,
        // oldest heartbeat first; the busy one is never selected.
        let workers = vec![a, b, c];
        let drained = excess_drain_candidates(&workers, 1, 3, 2);
        let ids: Vec<&str> = drained.iter().map(|w| w.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn no_drain_when_at_or_below_target() {
        let workers = vec![worker("a", WorkerState::Active, 0)];
        assert!(excess_drain_candidates(&workers, 1, 1, 2).is_empty());
        assert!(excess_drain_candidates(&workers, 2, 1, 2).is_empty());
    }
}
