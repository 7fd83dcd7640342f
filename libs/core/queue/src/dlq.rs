//! Dead-letter queue inspection and reprocessing.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::QueueError;
use crate::job::Job;
use crate::keyspace::{self, PriorityMap};

#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub index: isize,
    pub job: Job,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DlqStats {
    pub count: usize,
}

pub struct DlqManager {
    prefix: String,
}

impl DlqManager {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn key(&self) -> String {
        keyspace::dead_letter_list(&self.prefix)
    }

    pub async fn stats(&self, conn: &mut ConnectionManager) -> Result<DlqStats, QueueError> {
        let count: usize = conn.llen(self.key()).await?;
        Ok(DlqStats { count })
    }

    /// List up to `n` entries from the head without removing them.
    pub async fn list(
        &self,
        conn: &mut ConnectionManager,
        n: isize,
    ) -> Result<Vec<DlqEntry>, QueueError> {
        if n <= 0 {
            return Ok(Vec::new());
        }
        let raw: Vec<String> = conn.lrange(self.key(), 0, n - 1).await?;
        Ok(raw
            .into_iter()
            .enumerate()
            .filter_map(|(i, raw)| Job::from_json(&raw).ok().map(|job| DlqEntry {
                index: i as isize,
                job,
            }))
            .collect())
    }

    /// Delete every entry whose job id matches.
    pub async fn delete(&self, conn: &mut ConnectionManager, job_id: &str) -> Result<u64, QueueError> {
        let entries: Vec<String> = conn.lrange(self.key(), 0, -1).await?;
        let mut removed = 0u64;
        for raw in entries {
            if Job::from_json(&raw)
                .map(|j| j.id == job_id)
                .unwrap_or(false)
            {
                let n: u64 = conn.lrem(self.key(), 1, raw).await?;
                removed += n;
            }
        }
        Ok(removed)
    }

    /// Delete every entry in the dead-letter list.
    pub async fn purge(&self, conn: &mut ConnectionManager) -> Result<u64, QueueError> {
        let count: u64 = conn.llen(self.key()).await?;
        let _: () = conn.del(self.key()).await?;
        Ok(count)
    }

    /// Re-enqueue a single dead-lettered job (by id) back onto its priority
    /// queue, with `retry_count` reset to zero, and remove it from the DLQ.
    pub async fn reprocess_one(
        &self,
        conn: &mut ConnectionManager,
        priorities: &PriorityMap,
        job_id: &str,
    ) -> Result<bool, QueueError> {
        let entries: Vec<String> = conn.lrange(self.key(), 0, -1).await?;
        for raw in entries {
            let Ok(mut job) = Job::from_json(&raw) else {
                continue;
            };
            if job.id != job_id {
                continue;
            }
            let queue = priorities.queue_for(&job.priority).ok_or_else(|| {
                QueueError::InvalidConfiguration(format!(
                    "no queue configured for priority '{}'",
                    job.priority
                ))
            })?;
            job.retry_count = 0;
            job.last_error = None;
            let new_payload = job
                .to_json()
                .map_err(|e| QueueError::MalformedJob(e.to_string()))?;
            let _: u64 = conn.lrem(self.key(), 1, raw).await?;
            let _: u64 = conn.lpush(queue, new_payload).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Re-enqueue up to `limit` dead-lettered jobs, oldest first.
    pub async fn reprocess_batch(
        &self,
        conn: &mut ConnectionManager,
        priorities: &PriorityMap,
        limit: usize,
    ) -> Result<u64, QueueError> {
        let entries: Vec<String> = conn.lrange(self.key(), 0, limit.max(1) as isize - 1).await?;
        let mut reprocessed = 0u64;
        for raw in entries {
            let Ok(mut job) = Job::from_json(&raw) else {
                continue;
            };
            let Some(queue) = priorities.queue_for(&job.priority) else {
                continue;
            };
            job.retry_count = 0;
            job.last_error = None;
            let new_payload = match job.to_json() {
                Ok(p) => p,
                Err(_) => continue,
            };
            let _: u64 = conn.lrem(self.key(), 1, raw).await?;
            let _: u64 = conn.lpush(queue, new_payload).await?;
            reprocessed += 1;
        }
        Ok(reprocessed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_namespaced() {
        let mgr = DlqManager::new("wq");
        assert_eq!(mgr.key(), "wq:dead_letter");
    }
}
