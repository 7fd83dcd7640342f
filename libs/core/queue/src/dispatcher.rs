//! Dispatcher: priority-weighted polling loop with a starvation guard and
//! an admission-controller gate in front of every reservation attempt.

use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::admission::{Admission, AdmissionController};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::job::Outcome;
use crate::keyspace::PriorityMap;
use crate::metrics;
use crate::reservation::{self, ReserveOutcome, ReservedJob};
use crate::worker::{self, Handler};

/// Decides the poll order for one cycle. Every `guard_cycles`-th cycle polls
/// lowest-priority-first so a sustained burst of `high` traffic cannot
/// starve `low` forever; `guard_cycles == 0` disables the guard entirely.
pub fn poll_order<'a>(priorities: &'a [String], guard_cycles: u32, cycle: u64) -> Vec<&'a String> {
    if guard_cycles > 0 && cycle % guard_cycles as u64 == 0 {
        priorities.iter().rev().collect()
    } else {
        priorities.iter().collect()
    }
}

/// Drives reservation + execution + completion for a single worker process.
///
/// Owns a bounded pool of concurrent job slots (`max_concurrent_jobs`) and a
/// `JoinSet` that collects their outcomes so `complete` can run back on this
/// task rather than inside the slot itself - keeping the Redis connection
/// single-owner.
pub struct Dispatcher {
    conn: ConnectionManager,
    cfg: QueueConfig,
    priorities: PriorityMap,
    admission: AdmissionController,
    handler: Arc<dyn Handler>,
}

impl Dispatcher {
    pub fn new(conn: ConnectionManager, cfg: QueueConfig, handler: Arc<dyn Handler>) -> Self {
        let priorities = PriorityMap::new(&cfg.prefix, &cfg.priorities);
        let admission = AdmissionController::new(
            &cfg.prefix,
            cfg.admission_budget_per_window,
            cfg.admission_window,
        );
        Self {
            conn,
            cfg,
            priorities,
            admission,
            handler,
        }
    }

    /// Run until `shutdown_rx` reports `true`, then stop initiating new
    /// reservations and drain whatever is already in flight before
    /// returning.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrent_jobs));
        let mut in_flight: JoinSet<(ReservedJob, Outcome)> = JoinSet::new();
        let mut cycle: u64 = 0;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Err(e) = self.await_admission(&mut shutdown_rx).await {
                match e {
                    AdmissionWait::ShuttingDown => break,
                    AdmissionWait::Error => continue,
                }
            }

            let permit = tokio::select! {
                p = semaphore.clone().acquire_owned() => p.expect("semaphore never closed"),
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { break; }
                    continue;
                }
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.handle_completed(done).await;
                    continue;
                }
            };

            cycle += 1;
            let order = poll_order(self.priorities.priorities(), self.cfg.starvation_guard_cycles, cycle);
            metrics::record_in_flight(self.cfg.max_concurrent_jobs - semaphore.available_permits());

            for priority in order {
                let Some(queue) = self.priorities.queue_for(priority) else {
                    continue;
                };
                match reservation::reserve(
                    &mut self.conn,
                    &self.cfg.prefix,
                    &self.cfg.worker_id,
                    queue,
                    self.cfg.poll_timeout,
                    self.cfg.heartbeat_ttl,
                )
                .await
                {
                    Ok(ReserveOutcome::Reserved(reserved)) => {
                        metrics::record_job_consumed(priority);
                        let handler = Arc::clone(&self.handler);
                        let job = reserved.job().clone();
                        let job_timeout = self.cfg.job_timeout;
                        let grace = self.cfg.job_timeout_grace;
                        let permit = permit;
                        in_flight.spawn(async move {
                            let outcome = worker::run_job_slot(handler, job, job_timeout, grace).await;
                            drop(permit);
                            (reserved, outcome)
                        });
                        break;
                    }
                    Ok(ReserveOutcome::MalformedMovedToDeadLetter { reason }) => {
                        warn!(priority, reason, "reserved malformed job, moved to dead-letter");
                        continue;
                    }
                    Ok(ReserveOutcome::NoJob) => continue,
                    Err(e) => {
                        error!(priority, error = %e, "reserve failed");
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        continue;
                    }
                }
            }
            // `permit` drops here on a dry cycle (no queue had a job),
            // releasing the slot; the `Reserved` branch above moved it into
            // the spawned task instead.
        }

        info!(worker_id = %self.cfg.worker_id, "dispatcher draining in-flight jobs");
        while let Some(done) = in_flight.join_next().await {
            self.handle_completed(done).await;
        }
    }

    async fn handle_completed(
        &mut self,
        done: Result<(ReservedJob, Outcome), tokio::task::JoinError>,
    ) {
        let (reserved, outcome) = match done {
            Ok(pair) => pair,
            Err(join_err) => {
                error!(error = %join_err, "job slot task itself failed to join");
                return;
            }
        };

        let priority = reserved.job().priority.clone();
        let start = Instant::now();

        match worker::is_tombstoned(&mut self.conn, &self.cfg.prefix, &self.cfg.worker_id).await {
            Ok(true) => {
                warn!(worker_id = %self.cfg.worker_id, "tombstoned by reaper, skipping complete for in-flight job");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "failed to check tombstone before completing job");
            }
        }

        if !outcome.is_success() {
            metrics::record_job_failed(&priority, "handler_outcome");
        }

        let result = reservation::complete(
            &mut self.conn,
            &self.cfg.prefix,
            &self.cfg.worker_id,
            &self.priorities,
            self.cfg.max_retries,
            self.cfg.completed_list_cap,
            &reserved,
            outcome.clone(),
        )
        .await;

        match result {
            Ok(()) => {
                match outcome {
                    Outcome::Success => metrics::record_job_completed(&priority),
                    Outcome::Terminal(_) => metrics::record_job_dead_lettered(&priority),
                    Outcome::Retryable(_) if reserved.job().retry_count >= self.cfg.max_retries => {
                        metrics::record_job_dead_lettered(&priority)
                    }
                    Outcome::Retryable(_) => {}
                }
            }
            Err(e) => error!(job_id = %reserved.job().id, error = %e, "failed to complete job"),
        }

        debug!(job_id = %reserved.job().id, elapsed = ?start.elapsed(), "job slot settled");
    }

    async fn await_admission(
        &mut self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), AdmissionWait> {
        loop {
            match self.admission.check(&mut self.conn).await {
                Ok(Admission::Allowed) => {
                    metrics::record_admission_accepted();
                    return Ok(());
                }
                Ok(Admission::Denied { retry_after }) => {
                    metrics::record_admission_denied();
                    tokio::select! {
                        _ = tokio::time::sleep(retry_after) => return Ok(()),
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                return Err(AdmissionWait::ShuttingDown);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "admission check failed");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    return Err(AdmissionWait::Error);
                }
            }
        }
    }
}

enum AdmissionWait {
    ShuttingDown,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_order_is_forward_without_guard() {
        let priorities = vec!["high".to_string(), "default".to_string(), "low".to_string()];
        let order = poll_order(&priorities, 0, 50);
        assert_eq!(order, vec!["high", "default", "low"]);
    }

    #[test]
    fn poll_order_reverses_on_guard_cycle() {
        let priorities = vec!["high".to_string(), "default".to_string(), "low".to_string()];
        let order = poll_order(&priorities, 5, 10);
        assert_eq!(order, vec!["low", "default", "high"]);
    }

    #[test]
    fn poll_order_stays_forward_between_guard_cycles() {
        let priorities = vec!["high".to_string(), "default".to_string(), "low".to_string()];
        let order = poll_order(&priorities, 5, 11);
        assert_eq!(order, vec!["high", "default", "low"]);
    }
}
