//! Error taxonomy for the event hook bus. Delivery failures never
//! propagate to core job progress - this type exists so the hook bus's
//! own retry/dead-letter bookkeeping has somewhere to put its failures,
//! not so callers can fail a job transition over it.

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),

    #[error("malformed subscription: {0}")]
    MalformedSubscription(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}
