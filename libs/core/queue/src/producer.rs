//! Producer-side enqueue. Not a numbered component on its own - every
//! priority queue is just a Redis list, and enqueue is the one write any
//! external caller (or the `bench` admin command) performs against it.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::QueueError;
use crate::job::Job;
use crate::keyspace::PriorityMap;
use crate::metrics;

/// Push `job` onto the head of its priority's queue. `BLMOVE ... RIGHT`
/// pops from the tail, so this is a plain `LPUSH`.
pub async fn enqueue(
    conn: &mut ConnectionManager,
    priorities: &PriorityMap,
    job: &Job,
) -> Result<(), QueueError> {
    let queue = priorities.queue_for(&job.priority).ok_or_else(|| {
        QueueError::InvalidConfiguration(format!(
            "no queue configured for priority '{}'",
            job.priority
        ))
    })?;
    let payload = job
        .to_json()
        .map_err(|e| QueueError::MalformedJob(e.to_string()))?;
    let _: u64 = conn.lpush(queue, payload).await?;
    metrics::record_job_produced(&job.priority);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_priority_without_touching_redis() {
        let priorities = PriorityMap::new("wq", &["high", "low"]);
        let job = Job::new("j1", "medium", vec![]);
        assert!(priorities.queue_for(&job.priority).is_none());
    }
}
