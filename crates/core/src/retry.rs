//! Retry delay computation: exponential backoff with deterministic jitter.

use crate::config::RetryPolicy;
use crate::types::TimestampMs;

/// Knuth multiplicative hash constant used to mix the attempt count into
/// the jitter seed.
const JITTER_MIX: u32 = 2_654_435_761;

/// Compute the delay before the next retry of a message that has now
/// failed `attempts` times (attempts >= 1).
///
/// The exponential component is bounded to `[base_delay_ms, max_delay_ms]`,
/// then a jitter of up to `jitter_ratio` of the bounded delay is added.
/// The jitter is a deterministic hash of `(now_ms, attempts)`, so behavior
/// is reproducible under a fixed clock.
pub fn compute_retry_delay_ms(
    attempts: i32,
    policy: &RetryPolicy,
    now_ms: TimestampMs,
) -> TimestampMs {
    let exponent = (attempts - 1).max(0);
    let exponential = policy.base_delay_ms as f64 * policy.backoff_factor.powi(exponent);
    let bounded = exponential
        .max(policy.base_delay_ms as f64)
        .min(policy.max_delay_ms as f64);
    let jitter = (bounded * policy.jitter_ratio * pseudo_random(now_ms, attempts)).floor();
    bounded as TimestampMs + jitter as TimestampMs
}

/// Deterministic pseudo-random value in `[0, 1)` derived from the clock
/// and the attempt count.
fn pseudo_random(now_ms: TimestampMs, attempts: i32) -> f64 {
    let seed = (now_ms as u32) ^ (attempts as u32).wrapping_mul(JITTER_MIX);
    (seed % 10_000) as f64 / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 120_000,
            backoff_factor: 2.0,
            jitter_ratio: 0.1,
        }
    }

    #[test]
    fn delay_is_deterministic_for_fixed_clock() {
        let p = policy();
        let a = compute_retry_delay_ms(3, &p, 1_700_000_000_000);
        let b = compute_retry_delay_ms(3, &p, 1_700_000_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn delay_grows_exponentially_before_the_cap() {
        let p = RetryPolicy {
            jitter_ratio: 0.0,
            ..policy()
        };
        assert_eq!(compute_retry_delay_ms(1, &p, 0), 1_000);
        assert_eq!(compute_retry_delay_ms(2, &p, 0), 2_000);
        assert_eq!(compute_retry_delay_ms(3, &p, 0), 4_000);
        assert_eq!(compute_retry_delay_ms(4, &p, 0), 8_000);
    }

    #[test]
    fn delay_is_clamped_to_max() {
        let p = RetryPolicy {
            jitter_ratio: 0.0,
            ..policy()
        };
        // 2^19 seconds would be far past the cap.
        assert_eq!(compute_retry_delay_ms(20, &p, 0), 120_000);
    }

    #[test]
    fn zero_or_negative_attempts_fall_back_to_base_delay() {
        let p = RetryPolicy {
            jitter_ratio: 0.0,
            ..policy()
        };
        assert_eq!(compute_retry_delay_ms(0, &p, 0), 1_000);
        assert_eq!(compute_retry_delay_ms(-3, &p, 0), 1_000);
    }

    #[test]
    fn jitter_is_bounded_by_ratio() {
        let p = policy();
        for now in [0, 1, 999, 123_456_789, 1_700_000_000_000] {
            for attempts in 1..=6 {
                let with_jitter = compute_retry_delay_ms(attempts, &p, now);
                let without = compute_retry_delay_ms(
                    attempts,
                    &RetryPolicy {
                        jitter_ratio: 0.0,
                        ..p.clone()
                    },
                    now,
                );
                assert!(with_jitter >= without);
                assert!(with_jitter < without + (without as f64 * p.jitter_ratio) as i64 + 1);
            }
        }
    }
}
