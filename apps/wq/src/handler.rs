//! Demo handler wired into `--role=worker`. The dispatch engine is generic
//! over [`queue_core::Handler`]; this is the one concrete implementation
//! the binary ships so the worker role has something to run.

use async_trait::async_trait;
use queue_core::job::{Job, Outcome};
use queue_core::worker::Handler;
use queue_hooks::{Event, EventKind};
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Logs the job payload and reports success. Real deployments swap this
/// for a domain-specific handler; nothing in the dispatcher depends on it.
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Retryable("cancelled before execution started".to_string());
        }
        let payload = String::from_utf8_lossy(&job.payload);
        info!(job_id = %job.id, priority = %job.priority, payload = %payload, "echo handler processed job");
        Outcome::Success
    }
}

/// Wraps any [`Handler`] so each execution also appends `started` and
/// `succeeded`/`failed`/`retried` events onto the event-hook fan-out log.
/// `queue_core` itself stays free of a `queue_hooks` dependency - this
/// composition happens at the binary's wiring root instead, so the two
/// crates never depend on each other.
///
/// `ConnectionManager` is `Clone` and safe to share, but `Handler::execute`
/// takes `&self`; the `Mutex` only exists to give this wrapper an owned
/// clone to hand to `queue_hooks::publish` without requiring `&mut self`
/// on the trait.
pub struct HookEmittingHandler<H: Handler> {
    inner: H,
    conn: Mutex<ConnectionManager>,
    prefix: String,
    max_retries: u32,
}

impl<H: Handler> HookEmittingHandler<H> {
    pub fn new(
        inner: H,
        conn: ConnectionManager,
        prefix: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            inner,
            conn: Mutex::new(conn),
            prefix: prefix.into(),
            max_retries,
        }
    }

    async fn emit(&self, event: Event) {
        let mut conn = self.conn.lock().await;
        if let Err(e) = queue_hooks::publish(&mut conn, &self.prefix, &event).await {
            warn!(error = %e, event_kind = event.kind.as_str(), "failed to publish lifecycle event");
        }
    }
}

#[async_trait]
impl<H: Handler> Handler for HookEmittingHandler<H> {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> Outcome {
        self.emit(Event::new(EventKind::Started, job.id.clone())).await;

        let outcome = self.inner.execute(job, cancel).await;

        let event = match &outcome {
            Outcome::Success => Event::new(EventKind::Succeeded, job.id.clone()),
            Outcome::Terminal(reason) => {
                Event::new(EventKind::Failed, job.id.clone()).with_attribute("reason", reason.clone())
            }
            Outcome::Retryable(reason) => {
                let kind = if job.retry_count >= self.max_retries {
                    EventKind::DeadLettered
                } else {
                    EventKind::Retried
                };
                Event::new(kind, job.id.clone()).with_attribute("reason", reason.clone())
            }
        };
        self.emit(event).await;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_job_and_succeeds() {
        let job = Job::new("j1", "high", b"hello".to_vec());
        let outcome = EchoHandler.execute(&job, CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Success);
    }
}
