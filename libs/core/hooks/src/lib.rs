//! At-least-once lifecycle event fan-out to external HTTP subscribers.
//!
//! A worker runtime calls [`producer::publish`] on every state transition.
//! A [`fanout::FanoutDispatcher`] drains that log in order and resolves
//! matching [`subscription::Subscription`]s, enqueueing one delivery task
//! per match. One [`delivery::DeliveryWorker`] per subscription performs
//! the signed HTTP POST, retrying with backoff before giving up to the
//! dead-letter hook queue.

pub mod delivery;
pub mod error;
pub mod event;
pub mod fanout;
pub mod producer;
pub mod signing;
pub mod subscription;

pub use delivery::{DeliveryTask, DeliveryWorker};
pub use error::HookError;
pub use event::{Event, EventKind};
pub use fanout::FanoutDispatcher;
pub use producer::publish;
pub use subscription::{RetryPolicy, Subscription, SubscriptionStore};

pub type HookResult<T> = Result<T, HookError>;
