//! Admin Surface: inspection and destructive operations against live queue
//! state, plus the `bench` driver. Every operation here is read-consistent
//! only within its own store call - there is no cross-key snapshot.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::{Duration, Instant};

use crate::admission;
use crate::dlq::{DlqManager, DlqStats};
use crate::error::QueueError;
use crate::job::{Job, Outcome};
use crate::keyspace::{self, PriorityMap};
use crate::metrics::DurationHistogram;
use crate::producer;
use crate::reservation::{self, ReserveOutcome};

#[derive(Debug, Clone)]
pub struct QueueDepth {
    pub priority: String,
    pub queue: String,
    pub length: u64,
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub queues: Vec<QueueDepth>,
    pub processing_lists: u64,
    pub alive_workers: u64,
    pub completed_length: u64,
    pub dlq: DlqStats,
    pub rate_limit_ttl_secs: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub key: String,
    pub length: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StatsKeys {
    pub stats: Stats,
    pub keys: Vec<KeyEntry>,
}

#[derive(Debug, Clone)]
pub struct BenchResult {
    pub requested: u64,
    pub completed: u64,
    pub duration: Duration,
    pub throughput_per_sec: f64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
}

pub struct AdminSurface {
    prefix: String,
    priorities: PriorityMap,
    dlq: DlqManager,
    admission_window: Duration,
}

impl AdminSurface {
    pub fn new(prefix: impl Into<String>, priorities: PriorityMap, admission_window: Duration) -> Self {
        let prefix = prefix.into();
        let dlq = DlqManager::new(prefix.clone());
        Self {
            prefix,
            priorities,
            dlq,
            admission_window,
        }
    }

    pub async fn stats(&self, conn: &mut ConnectionManager) -> Result<Stats, QueueError> {
        let mut queues = Vec::new();
        for (priority, queue) in self.priorities.all_queues() {
            let length: u64 = conn.llen(queue).await?;
            queues.push(QueueDepth {
                priority: priority.to_string(),
                queue: queue.to_string(),
                length,
            });
        }

        let processing_lists =
            scan_count(conn, &keyspace::worker_processing_scan_pattern(&self.prefix)).await?;
        let alive_workers =
            scan_count(conn, &keyspace::worker_heartbeat_scan_pattern(&self.prefix)).await?;
        let completed_length: u64 = conn.llen(keyspace::completed_list(&self.prefix)).await?;
        let dlq_stats = self.dlq.stats(conn).await?;

        let window_secs = self.admission_window.as_secs().max(1);
        let epoch = admission::current_window_epoch(window_secs);
        let rate_limit_key = keyspace::rate_limit_key(&self.prefix, epoch);
        let ttl: i64 = conn.ttl(&rate_limit_key).await.unwrap_or(-1);
        let rate_limit_ttl_secs = (ttl > 0).then_some(ttl);

        Ok(Stats {
            queues,
            processing_lists,
            alive_workers,
            completed_length,
            dlq: dlq_stats,
            rate_limit_ttl_secs,
        })
    }

    pub async fn stats_keys(&self, conn: &mut ConnectionManager) -> Result<StatsKeys, QueueError> {
        let stats = self.stats(conn).await?;
        let mut keys = Vec::new();

        for depth in &stats.queues {
            keys.push(KeyEntry {
                key: depth.queue.clone(),
                length: Some(depth.length),
            });
        }
        keys.push(KeyEntry {
            key: keyspace::completed_list(&self.prefix),
            length: Some(stats.completed_length),
        });
        keys.push(KeyEntry {
            key: keyspace::dead_letter_list(&self.prefix),
            length: Some(stats.dlq.count as u64),
        });
        for key in scan_keys(conn, &keyspace::worker_processing_scan_pattern(&self.prefix)).await? {
            let length: u64 = conn.llen(&key).await.unwrap_or(0);
            keys.push(KeyEntry {
                key,
                length: Some(length),
            });
        }
        for key in scan_keys(conn, &keyspace::worker_heartbeat_scan_pattern(&self.prefix)).await? {
            keys.push(KeyEntry { key, length: None });
        }

        Ok(StatsKeys { stats, keys })
    }

    /// Read up to `n` entries from the head of `queue` without removing them.
    pub async fn peek(
        &self,
        conn: &mut ConnectionManager,
        priority: &str,
        n: isize,
    ) -> Result<Vec<Job>, QueueError> {
        if n <= 0 {
            return Ok(Vec::new());
        }
        let queue = self.priorities.queue_for(priority).ok_or_else(|| {
            QueueError::InvalidConfiguration(format!("no queue configured for priority '{priority}'"))
        })?;
        let raw: Vec<String> = conn.lrange(queue, 0, n - 1).await?;
        Ok(raw.into_iter().filter_map(|r| Job::from_json(&r).ok()).collect())
    }

    pub async fn purge_dlq(&self, conn: &mut ConnectionManager) -> Result<u64, QueueError> {
        self.dlq.purge(conn).await
    }

    /// Delete every key owned by this system. Refuses without `confirm`.
    pub async fn purge_all(
        &self,
        conn: &mut ConnectionManager,
        confirm: bool,
    ) -> Result<u64, QueueError> {
        if !confirm {
            return Err(QueueError::DestructiveUnconfirmed);
        }
        let pattern = format!("{}:*", self.prefix);
        let keys = scan_keys(conn, &pattern).await?;
        let mut deleted = 0u64;
        for key in keys {
            let removed: u64 = conn.del(&key).await?;
            deleted += removed;
        }
        Ok(deleted)
    }

    /// Enqueue `count` synthetic jobs at `rate_per_sec`, then self-drive a
    /// throwaway reserve/complete loop against them (a no-op success
    /// handler) so latency comes from measured reserve-to-complete wall
    /// time rather than from comparing against `created_at`.
    pub async fn bench(
        &self,
        conn: &mut ConnectionManager,
        worker_id: &str,
        priority: &str,
        count: u64,
        rate_per_sec: f64,
        timeout: Duration,
    ) -> Result<BenchResult, QueueError> {
        let queue = self.priorities.queue_for(priority).ok_or_else(|| {
            QueueError::InvalidConfiguration(format!("no queue configured for priority '{priority}'"))
        })?;

        let start = Instant::now();
        let pacing = if rate_per_sec > 0.0 {
            Duration::from_secs_f64(1.0 / rate_per_sec)
        } else {
            Duration::ZERO
        };
        for i in 0..count {
            let job = Job::new(format!("bench-{worker_id}-{i}"), priority, Vec::new());
            producer::enqueue(conn, &self.priorities, &job).await?;
            if !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
        }

        let mut histogram = DurationHistogram::new();
        let deadline = Instant::now() + timeout;
        let mut completed = 0u64;

        while completed < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let poll_timeout = (deadline - now).min(Duration::from_secs(1));

            match reservation::reserve(
                conn,
                &self.prefix,
                worker_id,
                queue,
                poll_timeout,
                Duration::from_secs(30),
            )
            .await?
            {
                ReserveOutcome::Reserved(reserved) => {
                    let exec_start = Instant::now();
                    reservation::complete(
                        conn,
                        &self.prefix,
                        worker_id,
                        &self.priorities,
                        0,
                        10_000,
                        &reserved,
                        Outcome::Success,
                    )
                    .await?;
                    histogram.record(exec_start.elapsed());
                    completed += 1;
                }
                ReserveOutcome::NoJob => continue,
                ReserveOutcome::MalformedMovedToDeadLetter { .. } => continue,
            }
        }

        let duration = start.elapsed();
        let throughput_per_sec = if duration.as_secs_f64() > 0.0 {
            completed as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Ok(BenchResult {
            requested: count,
            completed,
            duration,
            throughput_per_sec,
            p50_ms: histogram.percentile(0.50),
            p95_ms: histogram.percentile(0.95),
        })
    }
}

async fn scan_keys(conn: &mut ConnectionManager, pattern: &str) -> Result<Vec<String>, QueueError> {
    let mut cursor: u64 = 0;
    let mut keys = Vec::new();
    loop {
        let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(200)
            .query_async(conn)
            .await?;
        keys.extend(batch);
        cursor = next_cursor;
        if cursor == 0 {
            break;
        }
    }
    Ok(keys)
}

async fn scan_count(conn: &mut ConnectionManager, pattern: &str) -> Result<u64, QueueError> {
    Ok(scan_keys(conn, pattern).await?.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_surface_resolves_priority_queues() {
        let priorities = PriorityMap::new("wq", &["high", "low"]);
        let surface = AdminSurface::new("wq", priorities, Duration::from_secs(1));
        assert_eq!(surface.priorities.queue_for("high"), Some("wq:q:high"));
    }
}
