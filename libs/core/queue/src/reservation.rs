//! The reservation protocol: `reserve` and `complete`.
//!
//! `reserve` is a single `BLMOVE` - Redis already provides the blocking
//! atomic pop-and-push primitive needed here, so no script is required
//! for that half. `complete` always crosses two keys (processing list and a
//! destination list) and so always goes through one of the Lua scripts in
//! [`crate::scripts`].

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use crate::error::QueueError;
use crate::job::{Job, Outcome};
use crate::keyspace::{self, PriorityMap};
use crate::scripts;

/// A job together with the exact byte string that currently sits on the
/// processing list, so `complete` can `LREM` it precisely regardless of how
/// `serde_json` would re-serialize a mutated copy.
#[derive(Debug, Clone)]
pub struct ReservedJob {
    pub job: Job,
    raw: String,
}

impl ReservedJob {
    pub fn job(&self) -> &Job {
        &self.job
    }
}

#[derive(Debug)]
pub enum ReserveOutcome {
    Reserved(ReservedJob),
    NoJob,
    /// The payload could not be decoded. It has already been moved straight
    /// to the dead-letter list; there is nothing further for the caller to
    /// reserve.
    MalformedMovedToDeadLetter { reason: String },
}

/// Move exactly one job from `source_queue` onto `processing_list(worker_id)`.
pub async fn reserve(
    conn: &mut ConnectionManager,
    prefix: &str,
    worker_id: &str,
    source_queue: &str,
    timeout: Duration,
    heartbeat_ttl: Duration,
) -> Result<ReserveOutcome, QueueError> {
    let processing_list = keyspace::processing_list(prefix, worker_id);

    let raw: Option<String> = redis::cmd("BLMOVE")
        .arg(source_queue)
        .arg(&processing_list)
        .arg("RIGHT")
        .arg("LEFT")
        .arg(timeout.as_secs_f64())
        .query_async(conn)
        .await?;

    let Some(raw) = raw else {
        return Ok(ReserveOutcome::NoJob);
    };

    // Establish ownership before handing the job to a handler.
    let heartbeat = keyspace::heartbeat_key(prefix, worker_id);
    let _: () = conn
        .set_ex(&heartbeat, "1", heartbeat_ttl.as_secs().max(1))
        .await?;

    match Job::from_json(&raw) {
        Ok(job) => Ok(ReserveOutcome::Reserved(ReservedJob { job, raw })),
        Err(e) => {
            let reason = format!("malformed job payload: {e}");
            let dead_letter = keyspace::dead_letter_list(prefix);
            scripts::MOVE_TO_SINK
                .key(&processing_list)
                .key(&dead_letter)
                .arg(&raw)
                .arg(&raw)
                .arg(0)
                .invoke_async::<i64>(conn)
                .await?;
            Ok(ReserveOutcome::MalformedMovedToDeadLetter { reason })
        }
    }
}

/// Drive the `complete` step for a reserved job with a handler outcome.
pub async fn complete(
    conn: &mut ConnectionManager,
    prefix: &str,
    worker_id: &str,
    priorities: &PriorityMap,
    max_retries: u32,
    completed_cap: usize,
    reserved: &ReservedJob,
    outcome: Outcome,
) -> Result<(), QueueError> {
    let processing_list = keyspace::processing_list(prefix, worker_id);

    match outcome {
        Outcome::Success => {
            let mut job = reserved.job.clone();
            job.last_error = None;
            let new_payload = job
                .to_json()
                .map_err(|e| QueueError::MalformedJob(e.to_string()))?;
            let completed = keyspace::completed_list(prefix);
            scripts::MOVE_TO_SINK
                .key(&processing_list)
                .key(&completed)
                .arg(&reserved.raw)
                .arg(&new_payload)
                .arg(completed_cap)
                .invoke_async::<i64>(conn)
                .await?;
            Ok(())
        }
        Outcome::Retryable(reason) => {
            if reserved.job.retry_count < max_retries {
                let mut job = reserved.job.clone();
                job.retry_count += 1;
                job.last_error = Some(reason);
                let new_payload = job
                    .to_json()
                    .map_err(|e| QueueError::MalformedJob(e.to_string()))?;
                let source_queue = priorities.queue_for(&job.priority).ok_or_else(|| {
                    QueueError::InvalidConfiguration(format!(
                        "no queue configured for priority '{}'",
                        job.priority
                    ))
                })?;
                scripts::MOVE_TO_RETRY
                    .key(&processing_list)
                    .key(source_queue)
                    .arg(&reserved.raw)
                    .arg(&new_payload)
                    .invoke_async::<i64>(conn)
                    .await?;
                Ok(())
            } else {
                let mut job = reserved.job.clone();
                job.last_error = Some(reason);
                let new_payload = job
                    .to_json()
                    .map_err(|e| QueueError::MalformedJob(e.to_string()))?;
                let dead_letter = keyspace::dead_letter_list(prefix);
                scripts::MOVE_TO_SINK
                    .key(&processing_list)
                    .key(&dead_letter)
                    .arg(&reserved.raw)
                    .arg(&new_payload)
                    .arg(0)
                    .invoke_async::<i64>(conn)
                    .await?;
                Ok(())
            }
        }
        Outcome::Terminal(reason) => {
            let mut job = reserved.job.clone();
            job.last_error = Some(reason);
            let new_payload = job
                .to_json()
                .map_err(|e| QueueError::MalformedJob(e.to_string()))?;
            let dead_letter = keyspace::dead_letter_list(prefix);
            scripts::MOVE_TO_SINK
                .key(&processing_list)
                .key(&dead_letter)
                .arg(&reserved.raw)
                .arg(&new_payload)
                .arg(0)
                .invoke_async::<i64>(conn)
                .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_job_exposes_job() {
        let job = Job::new("j1", "high", vec![]);
        let reserved = ReservedJob {
            job: job.clone(),
            raw: job.to_json().unwrap(),
        };
        assert_eq!(reserved.job().id, "j1");
    }
}
