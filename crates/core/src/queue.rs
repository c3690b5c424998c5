//! Pure queue state-machine logic: claim ordering, conversation-lock
//! eligibility, failure transitions, and worker load release.
//!
//! The queue engine loads rows inside a database transaction and feeds them
//! through these functions, so the invariants here are testable without a
//! database.

use std::cmp::Ordering;

use crate::config::RetryPolicy;
use crate::retry::compute_retry_delay_ms;
use crate::types::{DbId, TimestampMs};

// ---------------------------------------------------------------------------
// Claim ordering and eligibility
// ---------------------------------------------------------------------------

/// The fields of a queued message that determine claim order.
#[derive(Debug, Clone)]
pub struct ClaimCandidate {
    pub message_id: DbId,
    pub conversation_id: String,
    pub priority: i32,
    pub scheduled_for: TimestampMs,
}

/// Claim order: priority descending, then scheduled time ascending, then
/// creation order ascending (row id) as a stable FIFO tie-break.
pub fn claim_order(a: &ClaimCandidate, b: &ClaimCandidate) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.scheduled_for.cmp(&b.scheduled_for))
        .then(a.message_id.cmp(&b.message_id))
}

/// Whether a conversation lock still excludes new claims.
///
/// `lock_expires_at` is `None` when the conversation holds no lock. An
/// expired lock (expiry <= now) no longer blocks; the claim that wins the
/// conversation overwrites it.
pub fn lock_is_live(lock_expires_at: Option<TimestampMs>, now_ms: TimestampMs) -> bool {
    matches!(lock_expires_at, Some(expires) if expires > now_ms)
}

// ---------------------------------------------------------------------------
// Failure transition
// ---------------------------------------------------------------------------

/// Outcome of failing a processing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Retry budget remains: requeue at `scheduled_for`.
    Requeue {
        attempts: i32,
        scheduled_for: TimestampMs,
    },
    /// Retry budget exhausted: dead-letter at `dead_lettered_at`.
    DeadLetter {
        attempts: i32,
        dead_lettered_at: TimestampMs,
    },
}

/// Decide what happens to a message whose current attempt just failed.
///
/// `attempts_before` is the count prior to this failure; the returned
/// outcome carries the incremented count.
pub fn plan_failure(
    attempts_before: i32,
    max_attempts: i32,
    policy: &RetryPolicy,
    now_ms: TimestampMs,
) -> FailureOutcome {
    let attempts = attempts_before + 1;
    if attempts >= max_attempts {
        FailureOutcome::DeadLetter {
            attempts,
            dead_lettered_at: now_ms,
        }
    } else {
        let delay = compute_retry_delay_ms(attempts, policy, now_ms);
        FailureOutcome::Requeue {
            attempts,
            scheduled_for: now_ms + delay,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker load release
// ---------------------------------------------------------------------------

/// Result of releasing one unit of worker load on complete/fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRelease {
    pub load_after: i32,
    /// Set when the worker just went idle: the instant its idle shutdown
    /// becomes due, measured from the last claim.
    pub scheduled_shutdown_at: Option<TimestampMs>,
}

/// Decrement a worker's load (floor 0). When the worker reaches zero load
/// its idle shutdown is armed at `last_claim_at + idle_timeout_ms`, so an
/// idle worker is revisited at a fixed deadline regardless of traffic.
pub fn plan_load_release(
    load_before: i32,
    last_claim_at: Option<TimestampMs>,
    idle_timeout_ms: TimestampMs,
    now_ms: TimestampMs,
) -> LoadRelease {
    let load_after = (load_before - 1).max(0);
    let scheduled_shutdown_at = if load_after == 0 {
        Some(last_claim_at.unwrap_or(now_ms) + idle_timeout_ms)
    } else {
        None
    };
    LoadRelease {
        load_after,
        scheduled_shutdown_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn candidate(id: DbId, priority: i32, scheduled_for: TimestampMs) -> ClaimCandidate {
        ClaimCandidate {
            message_id: id,
            conversation_id: format!("conv-{id}"),
            priority,
            scheduled_for,
        }
    }

    #[test]
    fn claim_order_prefers_priority_then_schedule_then_fifo() {
        // Priorities [10, 50, 50] with equal scheduled_for: the earlier
        // created of the two priority-50 messages wins, the priority-10
        // one goes last.
        let mut candidates = vec![
            candidate(1, 10, 0),
            candidate(2, 50, 0),
            candidate(3, 50, 0),
        ];
        candidates.sort_by(claim_order);
        let ids: Vec<DbId> = candidates.iter().map(|c| c.message_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn claim_order_earlier_schedule_beats_later_at_same_priority() {
        let mut candidates = vec![candidate(9, 50, 2_000), candidate(10, 50, 1_000)];
        candidates.sort_by(claim_order);
        assert_eq!(candidates[0].message_id, 10);
    }

    #[test]
    fn live_lock_blocks_claims_until_expiry() {
        assert!(lock_is_live(Some(1_001), 1_000));
        assert!(!lock_is_live(Some(1_000), 1_000));
        assert!(!lock_is_live(Some(999), 1_000));
        assert!(!lock_is_live(None, 1_000));
    }

    #[test]
    fn sweep_second_pass_finds_nothing_to_revert() {
        // The sweep targets processing messages whose lease has lapsed.
        // Reverting clears the lease and the processing flag, so a second
        // scan over the same state requeues nothing.
        let now = 1_000_000;
        let mut messages = vec![
            (true, Some(now - 1)),   // lease expired: swept
            (true, Some(now + 500)), // lease still live: untouched
            (false, None),           // already queued
        ];
        let sweep = |messages: &mut Vec<(bool, Option<TimestampMs>)>| {
            let mut requeued = 0;
            for message in messages.iter_mut() {
                if message.0 && !lock_is_live(message.1, now) {
                    *message = (false, None);
                    requeued += 1;
                }
            }
            requeued
        };
        assert_eq!(sweep(&mut messages), 1);
        assert_eq!(sweep(&mut messages), 0);
    }

    #[test]
    fn failures_requeue_until_max_attempts_then_dead_letter() {
        let policy = RetryPolicy::default();
        let now = 1_700_000_000_000;

        for attempts_before in 0..policy.max_attempts - 1 {
            let outcome = plan_failure(attempts_before, policy.max_attempts, &policy, now);
            assert_matches!(outcome, FailureOutcome::Requeue { attempts, scheduled_for } => {
                assert_eq!(attempts, attempts_before + 1);
                assert!(scheduled_for > now);
            });
        }

        let outcome = plan_failure(policy.max_attempts - 1, policy.max_attempts, &policy, now);
        assert_matches!(outcome, FailureOutcome::DeadLetter { attempts, dead_lettered_at } => {
            assert_eq!(attempts, policy.max_attempts);
            assert_eq!(dead_lettered_at, now);
        });
    }

    #[test]
    fn requeue_delay_never_schedules_in_the_past() {
        let policy = RetryPolicy::default();
        let outcome = plan_failure(0, 5, &policy, 42);
        assert_matches!(outcome, FailureOutcome::Requeue { scheduled_for, .. } => {
            assert!(scheduled_for >= 42 + policy.base_delay_ms);
        });
    }

    #[test]
    fn releasing_last_load_arms_idle_shutdown_from_last_claim() {
        // Claim at t=0, complete at t=60_000, idle timeout 300_000:
        // shutdown must be armed at exactly 360_000.
        let release = plan_load_release(1, Some(60_000), 300_000, 60_000);
        assert_eq!(release.load_after, 0);
        assert_eq!(release.scheduled_shutdown_at, Some(360_000));
    }

    #[test]
    fn release_with_remaining_load_does_not_arm_shutdown() {
        let release = plan_load_release(2, Some(10_000), 300_000, 20_000);
        assert_eq!(release.load_after, 1);
        assert_eq!(release.scheduled_shutdown_at, None);
    }

    #[test]
    fn release_never_drives_load_negative() {
        let release = plan_load_release(0, None, 300_000, 5_000);
        assert_eq!(release.load_after, 0);
        // No recorded claim: fall back to the release instant.
        assert_eq!(release.scheduled_shutdown_at, Some(305_000));
    }
}
