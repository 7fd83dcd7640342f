//! Key naming contract for the distributed work queue.
//!
//! Every other component addresses Redis state exclusively through this
//! module. No component is permitted to build a key by hand.

use std::collections::BTreeMap;

/// Ordered priority -> queue name mapping, stable for the lifetime of a process.
///
/// Order matters: it is the strict-priority polling order the dispatcher uses.
#[derive(Debug, Clone)]
pub struct PriorityMap {
    prefix: String,
    order: Vec<String>,
    queues: BTreeMap<String, String>,
}

impl PriorityMap {
    /// `priorities` is given highest-first.
    pub fn new(prefix: impl Into<String>, priorities: &[impl AsRef<str>]) -> Self {
        let prefix = prefix.into();
        let mut order = Vec::with_capacity(priorities.len());
        let mut queues = BTreeMap::new();
        for p in priorities {
            let p = p.as_ref().to_string();
            let queue = format!("{prefix}:q:{p}");
            queues.insert(p.clone(), queue);
            order.push(p);
        }
        Self {
            prefix,
            order,
            queues,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Highest-priority-first.
    pub fn priorities(&self) -> &[String] {
        &self.order
    }

    pub fn queue_for(&self, priority: &str) -> Option<&str> {
        self.queues.get(priority).map(String::as_str)
    }

    pub fn all_queues(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(|p| (p.as_str(), self.queues[p].as_str()))
    }
}

/// `<prefix>:worker:<worker_id>:processing`
pub fn processing_list(prefix: &str, worker_id: &str) -> String {
    format!("{prefix}:worker:{worker_id}:processing")
}

/// `<prefix>:worker:<worker_id>:hb`
pub fn heartbeat_key(prefix: &str, worker_id: &str) -> String {
    format!("{prefix}:worker:{worker_id}:hb")
}

/// `<prefix>:worker:<worker_id>:tombstone` - fencing key written by the reaper.
pub fn tombstone_key(prefix: &str, worker_id: &str) -> String {
    format!("{prefix}:worker:{worker_id}:tombstone")
}

/// Pattern used by the reaper's bounded SCAN to enumerate known worker ids.
/// This is the one enumeration in the system that is not a direct key lookup.
pub fn worker_heartbeat_scan_pattern(prefix: &str) -> String {
    format!("{prefix}:worker:*:hb")
}

/// Pattern the reaper scans to discover workers with undrained processing
/// lists. A crashed worker's heartbeat key has already expired by the time
/// its work needs recovering, so heartbeat keys alone cannot find it -
/// processing lists are the durable trace of a worker having existed.
pub fn worker_processing_scan_pattern(prefix: &str) -> String {
    format!("{prefix}:worker:*:processing")
}

/// Extract the worker id embedded in a processing-list key produced by
/// [`processing_list`].
pub fn worker_id_from_processing_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let lead = format!("{prefix}:worker:");
    let rest = key.strip_prefix(&lead)?;
    rest.strip_suffix(":processing")
}

pub fn completed_list(prefix: &str) -> String {
    format!("{prefix}:completed")
}

pub fn dead_letter_list(prefix: &str) -> String {
    format!("{prefix}:dead_letter")
}

/// `<prefix>:rl:<window_epoch>`
pub fn rate_limit_key(prefix: &str, window_epoch: u64) -> String {
    format!("{prefix}:rl:{window_epoch}")
}

pub fn hook_log_key(prefix: &str) -> String {
    format!("{prefix}:hooks:log")
}

pub fn hook_dlq_key(prefix: &str) -> String {
    format!("{prefix}:hooks:dlq")
}

pub fn hook_subscriptions_index_key(prefix: &str) -> String {
    format!("{prefix}:hooks:subscriptions")
}

pub fn hook_subscription_key(prefix: &str, subscription_id: &str) -> String {
    format!("{prefix}:hooks:subscription:{subscription_id}")
}

pub fn hook_delivery_queue_key(prefix: &str, subscription_id: &str) -> String {
    format!("{prefix}:hooks:deliver:{subscription_id}")
}

pub fn hook_inflight_key(prefix: &str) -> String {
    format!("{prefix}:hooks:inflight")
}

/// Extract the worker id embedded in a heartbeat key produced by [`heartbeat_key`].
pub fn worker_id_from_heartbeat_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let lead = format!("{prefix}:worker:");
    let rest = key.strip_prefix(&lead)?;
    rest.strip_suffix(":hb")
}
