//! Fan-out dispatcher: drains the durable event log in order and enqueues
//! one delivery task per matching subscription, using the same
//! reserve-like `BLMOVE` idiom the job dispatcher uses so a crashed
//! dispatcher never silently drops an event.

use queue_core::keyspace;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, warn};

use crate::delivery::DeliveryTask;
use crate::error::HookError;
use crate::event::Event;
use crate::subscription::SubscriptionStore;

pub struct FanoutDispatcher {
    conn: ConnectionManager,
    prefix: String,
    subscriptions: SubscriptionStore,
    poll_timeout: Duration,
}

impl FanoutDispatcher {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, poll_timeout: Duration) -> Self {
        let prefix = prefix.into();
        Self {
            conn,
            subscriptions: SubscriptionStore::new(prefix.clone()),
            prefix,
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
                        error!(error = %e, "fanout dispatcher tick failed");
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

    /// One drain-and-fan-out step. Public so tests can drive it without
    /// waiting on the blocking timeout.
    pub async fn tick(&mut self) -> Result<(), HookError> {
        let log = keyspace::hook_log_key(&self.prefix);
        let inflight = keyspace::hook_inflight_key(&self.prefix);

        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(&log)
            .arg(&inflight)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(self.poll_timeout.as_secs_f64())
            .query_async(&mut self.conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(());
        };

        let event = match Event::from_json(&raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "malformed event on fan-out log, dropping");
                let _: u64 = self.conn.lrem(&inflight, 1, &raw).await?;
                return Ok(());
            }
        };

        let matching = self.subscriptions.matching(&mut self.conn, event.kind).await?;
        for subscription in matching {
            let task = DeliveryTask {
                event: event.clone(),
                subscription_id: subscription.id.clone(),
                attempt: 0,
            };
            let payload = task
                .to_json()
                .map_err(|e| HookError::MalformedEvent(e.to_string()))?;
            let queue = keyspace::hook_delivery_queue_key(&self.prefix, &subscription.id);
            let _: u64 = self.conn.lpush(&queue, payload).await?;
        }

        let _: u64 = self.conn.lrem(&inflight, 1, &raw).await?;
        Ok(())
    }
}
