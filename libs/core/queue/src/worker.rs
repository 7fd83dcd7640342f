//! Worker Runtime: handler contract, per-job timeout, and heartbeat loop.

use async_trait::async_trait;
use futures::FutureExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::QueueError;
use crate::job::{Job, Outcome};
use crate::keyspace;

/// The capability set every handler implements: execute a job, honoring a
/// cancellation signal delivered on timeout.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> Outcome;
}

/// Run `handler` against `job`, enforcing `job_timeout` then a `grace`
/// window after cancellation is signalled, forcing `Retryable` if the
/// handler still hasn't returned.
async fn run_with_timeout(
    handler: &dyn Handler,
    job: &Job,
    job_timeout: Duration,
    grace: Duration,
) -> Outcome {
    let cancel = CancellationToken::new();
    let exec = handler.execute(job, cancel.clone());
    tokio::pin!(exec);

    tokio::select! {
        outcome = &mut exec => outcome,
        _ = tokio::time::sleep(job_timeout) => {
            cancel.cancel();
            tokio::select! {
                outcome = &mut exec => outcome,
                _ = tokio::time::sleep(grace) => {
                    warn!(job_id = %job.id, ?job_timeout, ?grace, "job exceeded timeout and grace window, forcing Retryable");
                    Outcome::Retryable(format!(
                        "exceeded timeout {job_timeout:?} plus grace {grace:?}"
                    ))
                }
            }
        }
    }
}

/// Execute one job end-to-end, recovering a handler panic into a
/// `Retryable` outcome rather than tearing down the slot that runs it.
pub async fn run_job_slot(
    handler: Arc<dyn Handler>,
    job: Job,
    job_timeout: Duration,
    grace: Duration,
) -> Outcome {
    let fut = AssertUnwindSafe(run_with_timeout(handler.as_ref(), &job, job_timeout, grace));
    match fut.catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Outcome::Retryable(format!("handler panicked: {}", panic_message(&panic))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Refresh `heartbeat(worker_id)` on `refresh_interval` until shutdown. After
/// `failure_threshold` consecutive refresh failures, signals drain via
/// `drain_tx` and stops - the dispatcher is expected to observe this and
/// stop initiating new reservations.
pub async fn heartbeat_loop(
    mut conn: ConnectionManager,
    prefix: String,
    worker_id: String,
    ttl: Duration,
    refresh_interval: Duration,
    failure_threshold: u32,
    mut shutdown_rx: watch::Receiver<bool>,
    drain_tx: watch::Sender<bool>,
) {
    let key = keyspace::heartbeat_key(&prefix, &worker_id);
    let mut consecutive_failures = 0u32;
    let mut ticker = tokio::time::interval(refresh_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        match refresh_heartbeat(&mut conn, &key, ttl).await {
            Ok(()) => {
                consecutive_failures = 0;
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(worker_id = %worker_id, error = %e, consecutive_failures, "heartbeat refresh failed");
                if consecutive_failures >= failure_threshold {
                    error!(worker_id = %worker_id, "heartbeat failed {failure_threshold} consecutive times, draining");
                    let _ = drain_tx.send(true);
                    break;
                }
            }
        }
    }
    info!(worker_id = %worker_id, "heartbeat loop exiting");
}

async fn refresh_heartbeat(
    conn: &mut ConnectionManager,
    key: &str,
    ttl: Duration,
) -> Result<(), QueueError> {
    let _: () = conn.set_ex(key, "1", ttl.as_secs().max(1)).await?;
    Ok(())
}

/// Checks whether the reaper has claimed this worker as dead. A worker that
/// observes its own tombstone MUST stop mutating its processing list - the
/// reaper already owns recovery of whatever is left there.
pub async fn is_tombstoned(
    conn: &mut ConnectionManager,
    prefix: &str,
    worker_id: &str,
) -> Result<bool, QueueError> {
    let key = keyspace::tombstone_key(prefix, worker_id);
    let exists: bool = conn.exists(&key).await?;
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ImmediateSuccess;

    #[async_trait]
    impl Handler for ImmediateSuccess {
        async fn execute(&self, _job: &Job, _cancel: CancellationToken) -> Outcome {
            Outcome::Success
        }
    }

    struct NeverReturns {
        observed_cancel: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Handler for NeverReturns {
        async fn execute(&self, _job: &Job, cancel: CancellationToken) -> Outcome {
            cancel.cancelled().await;
            self.observed_cancel.store(true, Ordering::SeqCst);
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    struct Panics;

    #[async_trait]
    impl Handler for Panics {
        async fn execute(&self, _job: &Job, _cancel: CancellationToken) -> Outcome {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn successful_handler_returns_success() {
        let job = Job::new("j1", "high", vec![]);
        let outcome = run_job_slot(
            Arc::new(ImmediateSuccess),
            job,
            Duration::from_secs(1),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn timeout_forces_retryable_after_grace_window() {
        let observed = Arc::new(AtomicBool::new(false));
        let job = Job::new("j1", "high", vec![]);
        let outcome = run_job_slot(
            Arc::new(NeverReturns {
                observed_cancel: observed.clone(),
            }),
            job,
            Duration::from_millis(20),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(outcome, Outcome::Retryable(_)));
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_retryable() {
        let job = Job::new("j1", "high", vec![]);
        let outcome = run_job_slot(
            Arc::new(Panics),
            job,
            Duration::from_secs(1),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(outcome, Outcome::Retryable(reason) if reason.contains("boom")));
    }
}
