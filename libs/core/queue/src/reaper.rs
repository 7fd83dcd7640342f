//! Reaper: recovers jobs left on the processing list of a worker that
//! stopped refreshing its heartbeat, via an `Alive -> Suspect -> Dead ->
//! Reaped` state machine per worker id.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::QueueError;
use crate::job::Job;
use crate::keyspace::{self, PriorityMap};
use crate::metrics;
use crate::scripts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Alive,
    Suspect,
    Dead,
}

pub struct Reaper {
    conn: ConnectionManager,
    prefix: String,
    priorities: PriorityMap,
    tombstone_ttl: Duration,
    states: HashMap<String, WorkerState>,
}

impl Reaper {
    pub fn new(
        conn: ConnectionManager,
        prefix: impl Into<String>,
        priorities: PriorityMap,
        tombstone_ttl: Duration,
    ) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            priorities,
            tombstone_ttl,
            states: HashMap::new(),
        }
    }

    pub async fn run(mut self, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
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
            if let Err(e) = self.tick().await {
                warn!(error = %e, "reaper tick failed");
            }
        }
        info!("reaper exiting");
    }

    /// One scan-and-recover pass. Public so tests (and `bench`) can drive it
    /// deterministically instead of waiting on the interval.
    pub async fn tick(&mut self) -> Result<(), QueueError> {
        let worker_ids = self.discover_workers_with_processing_lists().await?;

        for worker_id in worker_ids {
            let heartbeat = keyspace::heartbeat_key(&self.prefix, &worker_id);
            let alive: bool = self.conn.exists(&heartbeat).await?;

            if alive {
                self.states.insert(worker_id, WorkerState::Alive);
                continue;
            }

            let state = self
                .states
                .get(&worker_id)
                .copied()
                .unwrap_or(WorkerState::Alive);

            match state {
                WorkerState::Alive => {
                    self.states.insert(worker_id, WorkerState::Suspect);
                }
                WorkerState::Suspect => {
                    let tombstone = keyspace::tombstone_key(&self.prefix, &worker_id);
                    let claimed: i64 = scripts::CLAIM_DEAD_WORKER
                        .key(&heartbeat)
                        .key(&tombstone)
                        .arg(self.tombstone_ttl.as_secs().max(1))
                        .invoke_async(&mut self.conn)
                        .await?;

                    if claimed == 0 {
                        // Heartbeat reappeared between the SCAN and the claim
                        // attempt - the worker is alive after all.
                        self.states.insert(worker_id, WorkerState::Alive);
                        continue;
                    }

                    self.states.insert(worker_id.clone(), WorkerState::Dead);
                    self.requeue_processing_list(&worker_id).await?;
                    // Fully drained: nothing left to track this worker for.
                    self.states.remove(&worker_id);
                }
                WorkerState::Dead => {
                    // Still recovering from a previous tick (e.g. a large
                    // processing list); try again.
                    self.requeue_processing_list(&worker_id).await?;
                    self.states.remove(&worker_id);
                }
            }
        }

        Ok(())
    }

    async fn discover_workers_with_processing_lists(&mut self) -> Result<Vec<String>, QueueError> {
        let pattern = keyspace::worker_processing_scan_pattern(&self.prefix);
        let mut cursor: u64 = 0;
        let mut worker_ids = Vec::new();

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut self.conn)
                .await?;

            for key in keys {
                if let Some(id) = keyspace::worker_id_from_processing_key(&self.prefix, &key) {
                    worker_ids.push(id.to_string());
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(worker_ids)
    }

    async fn requeue_processing_list(&mut self, worker_id: &str) -> Result<(), QueueError> {
        let processing_list = keyspace::processing_list(&self.prefix, worker_id);
        let entries: Vec<String> = self.conn.lrange(&processing_list, 0, -1).await?;

        for raw in entries {
            match Job::from_json(&raw) {
                Ok(job) => {
                    let destination = self
                        .priorities
                        .queue_for(&job.priority)
                        .map(str::to_string)
                        .unwrap_or_else(|| keyspace::dead_letter_list(&self.prefix));

                    let removed: i64 = scripts::REAPER_REQUEUE_ONE
                        .key(&processing_list)
                        .key(&destination)
                        .arg(&raw)
                        .invoke_async(&mut self.conn)
                        .await?;

                    if removed > 0 {
                        metrics::record_reaper_recovery(&job.priority);
                    }
                }
                Err(e) => {
                    warn!(worker_id, error = %e, "malformed entry on orphaned processing list, moving to dead-letter");
                    let dead_letter = keyspace::dead_letter_list(&self.prefix);
                    scripts::MOVE_TO_SINK
                        .key(&processing_list)
                        .key(&dead_letter)
                        .arg(&raw)
                        .arg(&raw)
                        .arg(0)
                        .invoke_async::<i64>(&mut self.conn)
                        .await?;
                }
            }
        }

        let remaining: usize = self.conn.llen(&processing_list).await?;
        if remaining == 0 {
            let _: () = self.conn.del(&processing_list).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_state_transitions_are_ordered() {
        assert_ne!(WorkerState::Alive, WorkerState::Suspect);
        assert_ne!(WorkerState::Suspect, WorkerState::Dead);
    }
}
