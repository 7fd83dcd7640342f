//! TOML + environment configuration loading.
//!
//! Precedence: environment variable > TOML file value > hardcoded default,
//! mirroring `queue_core::QueueConfig::from_env`'s per-field defaults but
//! inserting an optional file layer beneath the environment - environment
//! variables take precedence over file values for any key present in both.

use core_config::ConfigError;
use queue_core::QueueConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub prefix: Option<String>,
    pub priorities: Option<Vec<String>>,
    pub starvation_guard_cycles: Option<u32>,
    pub poll_timeout_ms: Option<u64>,
    pub max_concurrent_jobs: Option<usize>,
    pub job_timeout_ms: Option<u64>,
    pub job_timeout_grace_ms: Option<u64>,
    pub worker_id: Option<String>,
    pub heartbeat_ttl_ms: Option<u64>,
    pub heartbeat_refresh_ms: Option<u64>,
    pub heartbeat_failure_threshold: Option<u32>,
    pub reaper_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub completed_cap: Option<usize>,
    pub admission_budget: Option<u64>,
    pub admission_window_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            key: path.display().to_string(),
            details: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::ParseError {
            key: path.display().to_string(),
            details: e.to_string(),
        })
    }
}

/// Resolve one scalar field: environment variable wins, then the file
/// value, then `default`.
fn resolved<T>(key: &str, file_val: Option<T>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::ParseError {
            key: key.to_string(),
            details: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(file_val.unwrap_or(default)),
    }
}

/// Build a [`QueueConfig`] layering environment variables over `file` over
/// hardcoded defaults. Uses the same `WQ_*` variable names as
/// `QueueConfig::from_env` so the two loading paths stay interchangeable.
pub fn load_queue_config(file: &FileConfig) -> Result<QueueConfig, ConfigError> {
    let prefix = std::env::var("WQ_PREFIX")
        .ok()
        .or_else(|| file.prefix.clone())
        .unwrap_or_else(|| "wq".to_string());

    let priorities = std::env::var("WQ_PRIORITIES")
        .ok()
        .map(|s| {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
        })
        .or_else(|| file.priorities.clone())
        .unwrap_or_else(|| vec!["high".to_string(), "default".to_string(), "low".to_string()]);

    let worker_id = std::env::var("WQ_WORKER_ID")
        .ok()
        .or_else(|| file.worker_id.clone())
        .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

    Ok(QueueConfig {
        prefix,
        priorities,
        starvation_guard_cycles: resolved(
            "WQ_STARVATION_GUARD_CYCLES",
            file.starvation_guard_cycles,
            50,
        )?,
        poll_timeout: Duration::from_millis(resolved(
            "WQ_POLL_TIMEOUT_MS",
            file.poll_timeout_ms,
            1000,
        )?),
        max_concurrent_jobs: resolved(
            "WQ_MAX_CONCURRENT_JOBS",
            file.max_concurrent_jobs,
            10,
        )?,
        job_timeout: Duration::from_millis(resolved(
            "WQ_JOB_TIMEOUT_MS",
            file.job_timeout_ms,
            30_000,
        )?),
        job_timeout_grace: Duration::from_millis(resolved(
            "WQ_JOB_TIMEOUT_GRACE_MS",
            file.job_timeout_grace_ms,
            2_000,
        )?),
        worker_id,
        heartbeat_ttl: Duration::from_millis(resolved(
            "WQ_HEARTBEAT_TTL_MS",
            file.heartbeat_ttl_ms,
            5_000,
        )?),
        heartbeat_refresh_interval: Duration::from_millis(resolved(
            "WQ_HEARTBEAT_REFRESH_MS",
            file.heartbeat_refresh_ms,
            1_000,
        )?),
        heartbeat_failure_drain_threshold: resolved(
            "WQ_HEARTBEAT_FAILURE_THRESHOLD",
            file.heartbeat_failure_threshold,
            3,
        )?,
        reaper_interval: Duration::from_millis(resolved(
            "WQ_REAPER_INTERVAL_MS",
            file.reaper_interval_ms,
            2_000,
        )?),
        max_retries: resolved("WQ_MAX_RETRIES", file.max_retries, 3)?,
        completed_list_cap: resolved("WQ_COMPLETED_CAP", file.completed_cap, 10_000)?,
        admission_budget_per_window: resolved(
            "WQ_ADMISSION_BUDGET",
            file.admission_budget,
            0,
        )?,
        admission_window: Duration::from_millis(resolved(
            "WQ_ADMISSION_WINDOW_MS",
            file.admission_window_ms,
            1_000,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_value_used_when_env_unset() {
        temp_env::with_var_unset("WQ_MAX_CONCURRENT_JOBS", || {
            let file = FileConfig {
                max_concurrent_jobs: Some(42),
                ..Default::default()
            };
            let cfg = load_queue_config(&file).unwrap();
            assert_eq!(cfg.max_concurrent_jobs, 42);
        });
    }

    #[test]
    fn env_overrides_file_value() {
        temp_env::with_var("WQ_MAX_CONCURRENT_JOBS", Some("7"), || {
            let file = FileConfig {
                max_concurrent_jobs: Some(42),
                ..Default::default()
            };
            let cfg = load_queue_config(&file).unwrap();
            assert_eq!(cfg.max_concurrent_jobs, 7);
        });
    }

    #[test]
    fn falls_back_to_hardcoded_default() {
        temp_env::with_var_unset("WQ_MAX_CONCURRENT_JOBS", || {
            let file = FileConfig::default();
            let cfg = load_queue_config(&file).unwrap();
            assert_eq!(cfg.max_concurrent_jobs, 10);
        });
    }

    #[test]
    fn parses_toml_file() {
        let raw = "prefix = \"custom\"\nmax_concurrent_jobs = 5\n";
        let file: FileConfig = toml::from_str(raw).unwrap();
        assert_eq!(file.prefix.as_deref(), Some("custom"));
        assert_eq!(file.max_concurrent_jobs, Some(5));
    }
}
