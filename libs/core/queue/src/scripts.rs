//! Lua scripts backing every multi-key mutation in the reservation protocol.
//!
//! Every transition that crosses two keys (processing list <-> sink, or
//! processing list <-> source queue) is a single `EVAL`, never two separate
//! round trips - this is what makes the "at most one location" invariant
//! hold under concurrent dispatchers and the reaper.

use once_cell::sync::Lazy;
use redis::Script;

/// Removes one matching entry from the processing list and appends the
/// (possibly updated) payload to a destination list, trimming the
/// destination to `cap` entries if `cap > 0`.
///
/// KEYS[1] = processing list
/// KEYS[2] = destination list (completed_list or dead_letter_list)
/// ARGV[1] = original payload, exactly as it appears on the processing list
/// ARGV[2] = payload to write to the destination list
/// ARGV[3] = cap (0 means unbounded)
pub static MOVE_TO_SINK: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('LPUSH', KEYS[2], ARGV[2])
local cap = tonumber(ARGV[3])
if cap > 0 then
    redis.call('LTRIM', KEYS[2], 0, cap - 1)
end
return 1
"#,
    )
});

/// Removes one matching entry from the processing list and re-enqueues it
/// onto the source queue for retry. Retry-ordering policy: `RPUSH` places
/// the job at the tail, which is the end the dispatcher pops from via
/// `BLMOVE ... RIGHT`, so a retried job is served before jobs still waiting
/// at the head - this is the "immediate retry" policy this implementation
/// chooses (see the retry-ordering open question).
///
/// KEYS[1] = processing list
/// KEYS[2] = source queue
/// ARGV[1] = original payload
/// ARGV[2] = payload to re-enqueue (with retry_count incremented)
pub static MOVE_TO_RETRY: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('RPUSH', KEYS[2], ARGV[2])
return 1
"#,
    )
});

/// Reaper recovery of a single abandoned job: move it from a dead worker's
/// processing list back onto its source queue, unchanged, using the same
/// immediate-retry positioning as [`MOVE_TO_RETRY`].
///
/// KEYS[1] = processing list
/// KEYS[2] = source queue
/// ARGV[1] = payload to recover
pub static REAPER_REQUEUE_ONE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed == 1 then
    redis.call('RPUSH', KEYS[2], ARGV[1])
end
return removed
"#,
    )
});

/// Writes the reaper's fencing tombstone only if the heartbeat key is still
/// absent at the moment of the write, narrowing the race window with a
/// worker that resumes between the reaper's liveness check and this call.
///
/// KEYS[1] = heartbeat key
/// KEYS[2] = tombstone key
/// ARGV[1] = tombstone TTL seconds
pub static CLAIM_DEAD_WORKER: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
return redis.call('SET', KEYS[2], '1', 'EX', ARGV[1], 'NX') and 1 or 0
"#,
    )
});
