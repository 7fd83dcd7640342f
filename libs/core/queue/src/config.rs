//! Typed configuration for every queue component, loaded from the environment.
//!
//! Mirrors the `FromEnv` convention used across this codebase's other
//! services: every field has an environment variable, with sane defaults for
//! everything except what genuinely has no safe default (the priority list).

use core_config::{env_or_default, ConfigError, FromEnv};
use std::time::Duration;

use crate::error::QueueError;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Namespace every key in this process's keyspace lives under.
    pub prefix: String,
    /// Highest-priority first.
    pub priorities: Vec<String>,
    /// 0 disables the starvation guard.
    pub starvation_guard_cycles: u32,
    /// Per-priority blocking timeout for a single reservation attempt.
    pub poll_timeout: Duration,
    /// Upper bound on concurrently executing jobs per worker process.
    pub max_concurrent_jobs: usize,
    /// Per-job wall-clock timeout before cancellation is signalled.
    pub job_timeout: Duration,
    /// Grace period after cancellation before the outcome is forced to Retryable.
    pub job_timeout_grace: Duration,
    /// Identity of this worker process. Generated if not set.
    pub worker_id: String,
    pub heartbeat_ttl: Duration,
    pub heartbeat_refresh_interval: Duration,
    /// Consecutive heartbeat refresh failures before the worker drains.
    pub heartbeat_failure_drain_threshold: u32,
    pub reaper_interval: Duration,
    pub max_retries: u32,
    /// `completed_list` is trimmed to this many entries.
    pub completed_list_cap: usize,
    /// 0 disables admission control.
    pub admission_budget_per_window: u64,
    pub admission_window: Duration,
}

impl QueueConfig {
    /// Fail fast at startup if the configuration cannot produce a correct system.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.priorities.is_empty() {
            return Err(QueueError::InvalidConfiguration(
                "priorities must list at least one priority".into(),
            ));
        }
        if self.heartbeat_ttl <= self.heartbeat_refresh_interval * 2 {
            return Err(QueueError::InvalidConfiguration(format!(
                "heartbeat_ttl ({:?}) must exceed 2x heartbeat_refresh_interval ({:?})",
                self.heartbeat_ttl, self.heartbeat_refresh_interval
            )));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(QueueError::InvalidConfiguration(
                "max_concurrent_jobs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl FromEnv for QueueConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let prefix = env_or_default("WQ_PREFIX", "wq");

        let priorities: Vec<String> = env_or_default("WQ_PRIORITIES", "high,default,low")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let worker_id = std::env::var("WQ_WORKER_ID")
            .unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::new_v4()));

        Ok(Self {
            prefix,
            priorities,
            starvation_guard_cycles: parse_env("WQ_STARVATION_GUARD_CYCLES", 50)?,
            poll_timeout: Duration::from_millis(parse_env("WQ_POLL_TIMEOUT_MS", 1000)?),
            max_concurrent_jobs: parse_env("WQ_MAX_CONCURRENT_JOBS", 10)?,
            job_timeout: Duration::from_millis(parse_env("WQ_JOB_TIMEOUT_MS", 30_000)?),
            job_timeout_grace: Duration::from_millis(parse_env("WQ_JOB_TIMEOUT_GRACE_MS", 2_000)?),
            worker_id,
            heartbeat_ttl: Duration::from_millis(parse_env("WQ_HEARTBEAT_TTL_MS", 5_000)?),
            heartbeat_refresh_interval: Duration::from_millis(parse_env(
                "WQ_HEARTBEAT_REFRESH_MS",
                1_000,
            )?),
            heartbeat_failure_drain_threshold: parse_env("WQ_HEARTBEAT_FAILURE_THRESHOLD", 3)?,
            reaper_interval: Duration::from_millis(parse_env("WQ_REAPER_INTERVAL_MS", 2_000)?),
            max_retries: parse_env("WQ_MAX_RETRIES", 3)?,
            completed_list_cap: parse_env("WQ_COMPLETED_CAP", 10_000)?,
            admission_budget_per_window: parse_env("WQ_ADMISSION_BUDGET", 0)?,
            admission_window: Duration::from_millis(parse_env("WQ_ADMISSION_WINDOW_MS", 1_000)?),
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::ParseError {
            key: key.to_string(),
            details: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> QueueConfig {
        QueueConfig {
            prefix: "wq".into(),
            priorities: vec!["high".into(), "low".into()],
            starvation_guard_cycles: 50,
            poll_timeout: Duration::from_millis(500),
            max_concurrent_jobs: 4,
            job_timeout: Duration::from_secs(30),
            job_timeout_grace: Duration::from_secs(2),
            worker_id: "w1".into(),
            heartbeat_ttl: Duration::from_secs(5),
            heartbeat_refresh_interval: Duration::from_secs(1),
            heartbeat_failure_drain_threshold: 3,
            reaper_interval: Duration::from_secs(2),
            max_retries: 3,
            completed_list_cap: 1000,
            admission_budget_per_window: 0,
            admission_window: Duration::from_secs(1),
        }
    }

    #[test]
    fn validates_clean_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_empty_priorities() {
        let mut cfg = base_config();
        cfg.priorities.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_heartbeat_ttl_not_exceeding_twice_refresh() {
        let mut cfg = base_config();
        cfg.heartbeat_ttl = Duration::from_secs(2);
        cfg.heartbeat_refresh_interval = Duration::from_secs(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_heartbeat_ttl_strictly_greater_than_twice_refresh() {
        let mut cfg = base_config();
        cfg.heartbeat_ttl = Duration::from_millis(2001);
        cfg.heartbeat_refresh_interval = Duration::from_secs(1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut cfg = base_config();
        cfg.max_concurrent_jobs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn from_env_uses_defaults_when_unset() {
        temp_env::with_vars_unset(
            vec![
                "WQ_PREFIX",
                "WQ_PRIORITIES",
                "WQ_STARVATION_GUARD_CYCLES",
                "WQ_WORKER_ID",
            ],
            || {
                let cfg = QueueConfig::from_env().unwrap();
                assert_eq!(cfg.prefix, "wq");
                assert_eq!(cfg.priorities, vec!["high", "default", "low"]);
                assert_eq!(cfg.starvation_guard_cycles, 50);
                assert!(cfg.worker_id.starts_with("worker-"));
            },
        );
    }

    #[test]
    fn from_env_respects_overrides() {
        temp_env::with_vars(
            vec![
                ("WQ_PREFIX", Some("custom")),
                ("WQ_PRIORITIES", Some("urgent,normal")),
                ("WQ_MAX_CONCURRENT_JOBS", Some("25")),
            ],
            || {
                let cfg = QueueConfig::from_env().unwrap();
                assert_eq!(cfg.prefix, "custom");
                assert_eq!(cfg.priorities, vec!["urgent", "normal"]);
                assert_eq!(cfg.max_concurrent_jobs, 25);
            },
        );
    }

    #[test]
    fn from_env_reports_parse_error() {
        temp_env::with_var("WQ_MAX_CONCURRENT_JOBS", Some("not-a-number"), || {
            let err = QueueConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { .. }));
        });
    }
}
