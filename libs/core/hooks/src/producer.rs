//! Producer-side append onto the durable event fan-out log. Every
//! lifecycle transition the worker runtime emits goes through [`publish`]
//! before the dispatcher ever sees it.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::HookError;
use crate::event::Event;
use queue_core::keyspace;

pub async fn publish(
    conn: &mut ConnectionManager,
    prefix: &str,
    event: &Event,
) -> Result<(), HookError> {
    let key = keyspace::hook_log_key(prefix);
    let payload = event
        .to_json()
        .map_err(|e| HookError::MalformedEvent(e.to_string()))?;
    let _: u64 = conn.lpush(&key, payload).await?;
    Ok(())
}
