//! Event Subscription storage: a Redis hash per subscription plus an index
//! set, so reads are immediately consistent with writes (both go through
//! the same connection pool) without standing up a second database.

use queue_core::keyspace;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::HookError;
use crate::event::EventKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub endpoint_url: String,
    pub event_filter: HashSet<EventKind>,
    pub secret: String,
    pub retry_policy: RetryPolicy,
    /// Attempt count after which a delivery is routed to the dead-letter
    /// hook queue instead of retried further.
    pub dead_letter_after: u32,
}

impl Subscription {
    pub fn matches(&self, kind: EventKind) -> bool {
        self.event_filter.is_empty() || self.event_filter.contains(&kind)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// CRUD surface over subscriptions, backed by Redis.
pub struct SubscriptionStore {
    prefix: String,
}

impl SubscriptionStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub async fn put(
        &self,
        conn: &mut ConnectionManager,
        subscription: &Subscription,
    ) -> Result<(), HookError> {
        let key = keyspace::hook_subscription_key(&self.prefix, &subscription.id);
        let index = keyspace::hook_subscriptions_index_key(&self.prefix);
        let payload = subscription
            .to_json()
            .map_err(|e| HookError::MalformedSubscription(e.to_string()))?;
        let _: () = conn.set(&key, payload).await?;
        let _: u64 = conn.sadd(&index, &subscription.id).await?;
        Ok(())
    }

    pub async fn get(
        &self,
        conn: &mut ConnectionManager,
        id: &str,
    ) -> Result<Option<Subscription>, HookError> {
        let key = keyspace::hook_subscription_key(&self.prefix, id);
        let raw: Option<String> = conn.get(&key).await?;
        match raw {
            Some(raw) => Ok(Some(Subscription::from_json(&raw).map_err(|e| {
                HookError::MalformedSubscription(e.to_string())
            })?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, conn: &mut ConnectionManager, id: &str) -> Result<(), HookError> {
        let key = keyspace::hook_subscription_key(&self.prefix, id);
        let index = keyspace::hook_subscriptions_index_key(&self.prefix);
        let _: u64 = conn.del(&key).await?;
        let _: u64 = conn.srem(&index, id).await?;
        Ok(())
    }

    /// All subscriptions currently registered, in no particular order.
    pub async fn list(
        &self,
        conn: &mut ConnectionManager,
    ) -> Result<Vec<Subscription>, HookError> {
        let index = keyspace::hook_subscriptions_index_key(&self.prefix);
        let ids: Vec<String> = conn.smembers(&index).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(sub) = self.get(conn, &id).await? {
                out.push(sub);
            }
        }
        Ok(out)
    }

    /// Subscriptions whose `event_filter` matches `kind`.
    pub async fn matching(
        &self,
        conn: &mut ConnectionManager,
        kind: EventKind,
    ) -> Result<Vec<Subscription>, HookError> {
        Ok(self
            .list(conn)
            .await?
            .into_iter()
            .filter(|s| s.matches(kind))
            .collect())
    }
}
