//! Provider error types and drain-oriented classification.

/// Errors from a compute provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("provider API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The provider response could not be decoded.
    #[error("provider response decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// The requested provider kind has no implementation.
    #[error("unsupported provider: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// True when the error means the machine no longer exists. Drain
    /// steps treat this as success: the desired end state already holds.
    pub fn is_missing_machine(&self) -> bool {
        match self {
            ProviderError::Api { status, body } => {
                *status == 404
                    || matches_any(
                        body,
                        &[
                            "not found",
                            "unknown machine",
                            "does not exist",
                            "internal server error",
                        ],
                    )
            }
            _ => false,
        }
    }

    /// True for transient precondition failures (machine not yet stopped
    /// when destroy was requested). The caller leaves the worker alone
    /// and retries on the next pass.
    pub fn is_retryable_precondition(&self) -> bool {
        match self {
            ProviderError::Api { body, .. } => matches_any(
                body,
                &[
                    "failed_precondition",
                    "unable to destroy machine",
                    "not currently stopped",
                ],
            ),
            _ => false,
        }
    }
}

fn matches_any(body: &str, needles: &[&str]) -> bool {
    let lower = body.to_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, body: &str) -> ProviderError {
        ProviderError::Api {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn missing_machine_matches_404_and_body_phrases() {
        assert!(api(404, "no such machine").is_missing_machine());
        assert!(api(500, "machine abc Not Found").is_missing_machine());
        assert!(api(422, "unknown machine id").is_missing_machine());
        assert!(!api(500, "internal error").is_missing_machine());
    }

    #[test]
    fn precondition_matches_destroy_race_phrases() {
        assert!(api(422, "FAILED_PRECONDITION: machine is active").is_retryable_precondition());
        assert!(api(409, "unable to destroy machine, not currently stopped")
            .is_retryable_precondition());
        assert!(!api(409, "conflict").is_retryable_precondition());
    }

    #[test]
    fn opaque_500_counts_as_machine_gone() {
        // Fly returns "internal server error" for destroys of machines
        // that are mid-teardown; treating it as gone keeps drains
        // idempotent.
        let err = api(500, "Internal Server Error");
        assert!(err.is_missing_machine());
        assert!(!err.is_retryable_precondition());
    }
}
