//! Per-subscription delivery worker: pops delivery tasks, signs and POSTs
//! them, and retries with exponential backoff before giving up to the
//! dead-letter hook queue.

use queue_core::error::backoff_with_jitter;
use queue_core::keyspace;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use stream_worker::resilience::{CircuitBreaker, CircuitBreakerConfig};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::HookError;
use crate::event::Event;
use crate::signing::sign;
use crate::subscription::Subscription;

/// A queued attempt to deliver one event to one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryTask {
    pub event: Event,
    pub subscription_id: String,
    pub attempt: u32,
}

impl DeliveryTask {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// One bounded-concurrency delivery loop dedicated to a single subscription,
/// so one slow/broken endpoint never starves another's delivery queue.
pub struct DeliveryWorker {
    conn: ConnectionManager,
    http: reqwest::Client,
    prefix: String,
    subscription: Subscription,
    breaker: Arc<CircuitBreaker>,
    poll_timeout: Duration,
}

impl DeliveryWorker {
    pub fn new(
        conn: ConnectionManager,
        http: reqwest::Client,
        prefix: impl Into<String>,
        subscription: Subscription,
        poll_timeout: Duration,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 30,
            error_rate_threshold: None,
            window_size: 50,
        }));
        Self {
            conn,
            http,
            prefix: prefix.into(),
            subscription,
            breaker,
            poll_timeout,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                result = self.tick() => {
                    if let Err(e) = result {
                        warn!(
                            subscription_id = %self.subscription.id,
                            error = %e,
                            "delivery worker tick failed"
                        );
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One pop-deliver-ack step. Public so tests can drive it deterministically.
    pub async fn tick(&mut self) -> Result<(), HookError> {
        let queue = keyspace::hook_delivery_queue_key(&self.prefix, &self.subscription.id);
        let inflight = format!("{queue}:inflight");

        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(&queue)
            .arg(&inflight)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(self.poll_timeout.as_secs_f64())
            .query_async(&mut self.conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(());
        };

        let task = match DeliveryTask::from_json(&raw) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "malformed delivery task, dropping");
                let _: u64 = self.conn.lrem(&inflight, 1, &raw).await?;
                return Ok(());
            }
        };

        if !self.breaker.can_execute() {
            // Endpoint is tripped; park the task at the back of its own
            // queue instead of busy-looping the HTTP call.
            let _: u64 = self.conn.lpush(&queue, &raw).await?;
            let _: u64 = self.conn.lrem(&inflight, 1, &raw).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            return Ok(());
        }

        match self.deliver(&task).await {
            Ok(()) => {
                self.breaker.record_success();
                info!(
                    subscription_id = %self.subscription.id,
                    event_id = %task.event.event_id,
                    "hook delivered"
                );
            }
            Err(e) => {
                self.breaker.record_failure();
                self.handle_failure(task, e).await?;
            }
        }

        let _: u64 = self.conn.lrem(&inflight, 1, &raw).await?;
        Ok(())
    }

    async fn deliver(&self, task: &DeliveryTask) -> Result<(), HookError> {
        let body = task
            .event
            .to_json()
            .map_err(|e| HookError::MalformedEvent(e.to_string()))?;
        let signature = sign(&self.subscription.secret, body.as_bytes());

        let response = self
            .http
            .post(&self.subscription.endpoint_url)
            .header("Content-Type", "application/json")
            .header("X-Signature", signature)
            .header("X-Event-Kind", task.event.kind.as_str())
            .body(body)
            .send()
            .await
            .map_err(|e| HookError::DeliveryFailed(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(HookError::DeliveryFailed(format!(
                "endpoint returned {}",
                response.status()
            )))
        }
    }

    async fn handle_failure(&mut self, task: DeliveryTask, cause: HookError) -> Result<(), HookError> {
        let next_attempt = task.attempt + 1;
        let policy = &self.subscription.retry_policy;

        if next_attempt >= self.subscription.dead_letter_after
            || next_attempt >= policy.max_attempts
        {
            warn!(
                subscription_id = %self.subscription.id,
                event_id = %task.event.event_id,
                attempts = next_attempt,
                error = %cause,
                "hook delivery exhausted, routing to dead-letter"
            );
            let dlq = keyspace::hook_dlq_key(&self.prefix);
            let payload = task
                .to_json()
                .map_err(|e| HookError::MalformedEvent(e.to_string()))?;
            let _: u64 = self.conn.lpush(&dlq, payload).await?;
            return Ok(());
        }

        let delay = backoff_with_jitter(next_attempt, policy.backoff_base, policy.backoff_cap);
        let retried = DeliveryTask {
            event: task.event,
            subscription_id: task.subscription_id.clone(),
            attempt: next_attempt,
        };
        let payload = retried
            .to_json()
            .map_err(|e| HookError::MalformedEvent(e.to_string()))?;
        let queue = keyspace::hook_delivery_queue_key(&self.prefix, &task.subscription_id);

        tokio::time::sleep(delay).await;
        let _: u64 = self.conn.lpush(&queue, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::subscription::RetryPolicy;
    use std::collections::HashSet;

    fn subscription() -> Subscription {
        Subscription {
            id: "sub-1".to_string(),
            endpoint_url: "https://example.com/hook".to_string(),
            event_filter: HashSet::new(),
            secret: "s3cr3t".to_string(),
            retry_policy: RetryPolicy {
                max_attempts: 3,
                backoff_base: Duration::from_millis(1),
                backoff_cap: Duration::from_millis(10),
            },
            dead_letter_after: 3,
        }
    }

    #[test]
    fn delivery_task_serializes_attempt_count() {
        let task = DeliveryTask {
            event: Event::new(EventKind::Failed, "j1"),
            subscription_id: "sub-1".to_string(),
            attempt: 1,
        };
        let raw = task.to_json().unwrap();
        assert!(raw.contains("\"attempt\":1"));
    }

    #[test]
    fn subscription_fixture_has_finite_retries() {
        let sub = subscription();
        assert_eq!(sub.retry_policy.max_attempts, 3);
        assert_eq!(sub.dead_letter_after, 3);
    }
}
