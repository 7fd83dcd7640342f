//! Error taxonomy for the queue engine.
//!
//! Every fallible operation in this crate returns a [`QueueError`]. Retry
//! policy is driven off [`QueueError::category`] rather than matching on
//! individual variants, so new failure modes can be added within a category
//! without touching dispatch logic.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("malformed job: {0}")]
    MalformedJob(String),

    #[error("handler returned terminal failure: {0}")]
    HandlerTerminal(String),

    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("destructive operation refused without confirmation")]
    DestructiveUnconfirmed,
}

/// The coarse-grained category every [`QueueError`] falls into, matching
/// the taxonomy kinds rather than the concrete variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    TransientStoreUnavailable,
    TransientRateLimited,
    PermanentMalformedJob,
    PermanentHandlerTerminal,
    OperationalTimeout,
    ConfigurationInvalid,
    AdminRefusedDestructiveUnconfirmed,
}

impl QueueError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            QueueError::StoreUnavailable(_) => ErrorCategory::TransientStoreUnavailable,
            QueueError::RateLimited { .. } => ErrorCategory::TransientRateLimited,
            QueueError::MalformedJob(_) => ErrorCategory::PermanentMalformedJob,
            QueueError::HandlerTerminal(_) => ErrorCategory::PermanentHandlerTerminal,
            QueueError::Timeout(_) => ErrorCategory::OperationalTimeout,
            QueueError::InvalidConfiguration(_) => ErrorCategory::ConfigurationInvalid,
            QueueError::DestructiveUnconfirmed => {
                ErrorCategory::AdminRefusedDestructiveUnconfirmed
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientStoreUnavailable
                | ErrorCategory::TransientRateLimited
                | ErrorCategory::OperationalTimeout
        )
    }

    /// Exit code for the administrative CLI, per the external interface contract.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::ConfigurationInvalid => 2,
            ErrorCategory::AdminRefusedDestructiveUnconfirmed => 3,
            _ => 1,
        }
    }
}

/// Exponential backoff with +/-25% jitter, shared by the Redis connection
/// retry path and the event-hook delivery retry path.
pub fn backoff_with_jitter(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(cap.as_millis());
    let jitter_fraction = jitter_fraction();
    let jittered = (capped as f64 * jitter_fraction) as u128;
    Duration::from_millis(jittered.max(1) as u64)
}

/// A simple hash-based pseudo-random fraction in [0.75, 1.25), deliberately
/// not pulling in `rand` for a single jitter coefficient.
fn jitter_fraction() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;

    let sample = RandomState::new().hash_one(std::time::SystemTime::now());
    0.75 + ((sample % 1000) as f64 / 1000.0) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_store_errors_as_transient() {
        let err = QueueError::RateLimited {
            retry_after: Duration::from_secs(1),
        };
        assert_eq!(err.category(), ErrorCategory::TransientRateLimited);
        assert!(err.is_retryable());
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        let err = QueueError::HandlerTerminal("bad input".into());
        assert!(!err.is_retryable());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn destructive_unconfirmed_maps_to_exit_code_three() {
        assert_eq!(QueueError::DestructiveUnconfirmed.exit_code(), 3);
    }

    #[test]
    fn invalid_configuration_maps_to_exit_code_two() {
        let err = QueueError::InvalidConfiguration("missing priorities".into());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn backoff_grows_and_stays_capped() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(5);
        let small = backoff_with_jitter(0, base, cap);
        let large = backoff_with_jitter(10, base, cap);
        assert!(small <= cap);
        assert!(large <= cap + Duration::from_millis(1));
    }
}
