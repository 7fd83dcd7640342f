//! Admission Controller: a fixed-window counter keyed by window epoch.

use redis::aio::ConnectionManager;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::QueueError;
use crate::keyspace;

#[derive(Debug, Clone, Copy)]
pub enum Admission {
    Allowed,
    Denied { retry_after: Duration },
}

/// `budget_per_window == 0` disables admission control entirely - every
/// request is allowed without touching Redis.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    prefix: String,
    budget_per_window: u64,
    window: Duration,
}

impl AdmissionController {
    pub fn new(prefix: impl Into<String>, budget_per_window: u64, window: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            budget_per_window,
            window,
        }
    }

    pub async fn check(&self, conn: &mut ConnectionManager) -> Result<Admission, QueueError> {
        if self.budget_per_window == 0 {
            return Ok(Admission::Allowed);
        }

        let window_secs = self.window.as_secs().max(1);
        let epoch = current_window_epoch(window_secs);
        let key = keyspace::rate_limit_key(&self.prefix, epoch);

        let count: u64 = redis::cmd("INCR").arg(&key).query_async(conn).await?;
        if count == 1 {
            // Only the first admission in a window sets the TTL, so a late
            // arrival never re-extends the window.
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(window_secs)
                .arg("NX")
                .query_async(conn)
                .await?;
        }

        if count > self.budget_per_window {
            let ttl: i64 = redis::cmd("TTL").arg(&key).query_async(conn).await?;
            let retry_after = if ttl > 0 {
                Duration::from_secs(ttl as u64)
            } else {
                self.window
            };
            Ok(Admission::Denied { retry_after })
        } else {
            Ok(Admission::Allowed)
        }
    }
}

pub(crate) fn current_window_epoch(window_secs: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    now / window_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_epoch_is_stable_within_a_window() {
        let a = current_window_epoch(60);
        let b = current_window_epoch(60);
        assert_eq!(a, b);
    }

    #[test]
    fn disabled_controller_has_zero_budget() {
        let controller = AdmissionController::new("wq", 0, Duration::from_secs(1));
        assert_eq!(controller.budget_per_window, 0);
    }
}
