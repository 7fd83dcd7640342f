//! Redis-backed distributed work queue: reservation protocol, priority
//! dispatcher, worker runtime, reaper, admission control, dead-letter
//! handling and admin surface.
//!
//! # Architecture
//!
//! ```text
//! Producer                 Dispatcher                  Worker Runtime
//!   │ LPUSH                   │ BLMOVE                     │ execute
//!   v                         v                            v
//! q:<priority> ──reserve──> worker:<id>:processing ──complete──> completed / dead_letter
//!                                  ^
//!                                  │ reaper recovers on heartbeat expiry
//! ```
//!
//! Every cross-key mutation (reserve's destination write, complete's sink
//! move, reaper recovery) goes through [`scripts`] so the "a job is in at
//! most one list" invariant holds under concurrent dispatchers and the
//! reaper.

pub mod admin;
pub mod admission;
pub mod config;
pub mod dispatcher;
pub mod dlq;
pub mod error;
pub mod job;
pub mod keyspace;
pub mod metrics;
pub mod producer;
pub mod reaper;
pub mod reservation;
mod scripts;
pub mod worker;

pub use admin::{AdminSurface, BenchResult, Stats, StatsKeys};
pub use admission::{Admission, AdmissionController};
pub use config::QueueConfig;
pub use dispatcher::Dispatcher;
pub use dlq::{DlqEntry, DlqManager, DlqStats};
pub use error::{backoff_with_jitter, ErrorCategory, QueueError};
pub use job::{Job, Outcome};
pub use keyspace::PriorityMap;
pub use reaper::Reaper;
pub use reservation::{complete, reserve, ReserveOutcome, ReservedJob};
pub use worker::Handler;

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
