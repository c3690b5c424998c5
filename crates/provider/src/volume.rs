//! Dedicated per-worker volume naming.
//!
//! Fly volume names are limited to 30 characters of `[a-z0-9_]`. Each
//! worker gets a deterministic name derived from the configured prefix
//! and a stable hash of the worker ID, so re-spawning the same worker
//! reattaches its existing volume.

use sha2::{Digest, Sha256};

/// Maximum Fly volume name length.
const MAX_VOLUME_NAME_LEN: usize = 30;

/// Hash suffix length in the generated name.
const HASH_LEN: usize = 8;

/// Build the dedicated volume name `{prefix}_{hash}` for a worker.
pub fn dedicated_volume_name(prefix: &str, worker_id: &str) -> String {
    let prefix = match sanitize(prefix) {
        s if s.is_empty() => "worker_data".to_string(),
        s => s,
    };
    let worker = match sanitize(worker_id) {
        s if s.is_empty() => "worker".to_string(),
        s => s,
    };

    let mut hasher = Sha256::new();
    hasher.update(worker.as_bytes());
    let digest = hasher.finalize();
    let hash: String = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>()
        .chars()
        .take(HASH_LEN)
        .collect();

    let max_prefix_len = MAX_VOLUME_NAME_LEN - 1 - HASH_LEN;
    let trimmed: String = prefix.chars().take(max_prefix_len.max(1)).collect();
    format!("{trimmed}_{hash}")
}

/// Lowercase, map everything outside `[a-z0-9_]` to `_`, collapse runs,
/// and trim leading/trailing underscores.
fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_underscore = false;
    for ch in value.to_lowercase().chars() {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '_'
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_deterministic_per_worker() {
        let a = dedicated_volume_name("openclaw_data", "afw-1700000000000-0");
        let b = dedicated_volume_name("openclaw_data", "afw-1700000000000-0");
        assert_eq!(a, b);
    }

    #[test]
    fn different_workers_get_different_names() {
        let a = dedicated_volume_name("openclaw_data", "afw-1700000000000-0");
        let b = dedicated_volume_name("openclaw_data", "afw-1700000000000-1");
        assert_ne!(a, b);
    }

    #[test]
    fn name_fits_fly_limit() {
        let name = dedicated_volume_name(
            "a_very_long_volume_prefix_that_exceeds_the_limit",
            "afw-1700000000000-0",
        );
        assert!(name.len() <= MAX_VOLUME_NAME_LEN, "{name}");
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn sanitize_collapses_and_trims_underscores() {
        assert_eq!(sanitize("__Open--Claw  Data__"), "open_claw_data");
        assert_eq!(sanitize("***"), "");
    }

    #[test]
    fn empty_inputs_fall_back_to_defaults() {
        let name = dedicated_volume_name("", "");
        assert!(name.starts_with("worker_data_"));
    }
}
