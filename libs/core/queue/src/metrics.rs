//! Prometheus metrics recording for the queue engine.
//!
//! Follows the same shape as `stream-worker::metrics`: named constants,
//! thin `record_*` wrappers around the `metrics` crate's macros, and a
//! process-wide recorder installed once via [`init_metrics`].

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const JOBS_PRODUCED: &str = "wq_jobs_produced_total";
pub const JOBS_CONSUMED: &str = "wq_jobs_consumed_total";
pub const JOBS_COMPLETED: &str = "wq_jobs_completed_total";
pub const JOBS_FAILED: &str = "wq_jobs_failed_total";
pub const JOBS_DEAD_LETTERED: &str = "wq_jobs_dead_lettered_total";
pub const JOB_DURATION_SECONDS: &str = "wq_job_duration_seconds";
pub const QUEUE_LENGTH: &str = "wq_queue_length";
pub const REAPER_RECOVERIES: &str = "wq_reaper_recoveries_total";
pub const ADMISSION_ACCEPTED: &str = "wq_admission_accepted_total";
pub const ADMISSION_DENIED: &str = "wq_admission_denied_total";
pub const HOOK_DELIVERED: &str = "wq_hook_delivered_total";
pub const HOOK_FAILED: &str = "wq_hook_failed_total";
pub const HOOK_DEAD_LETTERED: &str = "wq_hook_dead_lettered_total";
pub const CIRCUIT_BREAKER_STATE: &str = "wq_circuit_breaker_state";
pub const IN_FLIGHT_JOBS: &str = "wq_in_flight_jobs";

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub fn init_metrics() -> &'static PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");
        describe_metrics();
        handle
    })
}

pub fn metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

fn describe_metrics() {
    describe_counter!(JOBS_PRODUCED, "Jobs enqueued onto a priority queue");
    describe_counter!(JOBS_CONSUMED, "Jobs reserved by a worker");
    describe_counter!(JOBS_COMPLETED, "Jobs that reached completed_list");
    describe_counter!(JOBS_FAILED, "Jobs that returned a non-success outcome");
    describe_counter!(JOBS_DEAD_LETTERED, "Jobs that reached dead_letter_list");
    describe_histogram!(JOB_DURATION_SECONDS, "Handler execution duration");
    describe_gauge!(QUEUE_LENGTH, "Current length of a priority queue");
    describe_counter!(REAPER_RECOVERIES, "Jobs recovered from dead workers");
    describe_counter!(ADMISSION_ACCEPTED, "Reservations allowed by the admission controller");
    describe_counter!(ADMISSION_DENIED, "Reservations denied by the admission controller");
    describe_counter!(HOOK_DELIVERED, "Event hook deliveries that succeeded");
    describe_counter!(HOOK_FAILED, "Event hook delivery attempts that failed");
    describe_counter!(HOOK_DEAD_LETTERED, "Event hook deliveries exhausted to dead-letter");
    describe_gauge!(CIRCUIT_BREAKER_STATE, "0=closed 1=half-open 2=open, per subscription");
    describe_gauge!(IN_FLIGHT_JOBS, "Jobs currently executing in this worker process");
}

pub fn record_job_produced(priority: &str) {
    counter!(JOBS_PRODUCED, "priority" => priority.to_string()).increment(1);
}

pub fn record_job_consumed(priority: &str) {
    counter!(JOBS_CONSUMED, "priority" => priority.to_string()).increment(1);
}

pub fn record_job_completed(priority: &str) {
    counter!(JOBS_COMPLETED, "priority" => priority.to_string()).increment(1);
}

pub fn record_job_failed(priority: &str, reason: &'static str) {
    counter!(JOBS_FAILED, "priority" => priority.to_string(), "reason" => reason).increment(1);
}

pub fn record_job_dead_lettered(priority: &str) {
    counter!(JOBS_DEAD_LETTERED, "priority" => priority.to_string()).increment(1);
}

pub fn record_job_duration(priority: &str, seconds: f64) {
    histogram!(JOB_DURATION_SECONDS, "priority" => priority.to_string()).record(seconds);
}

pub fn record_queue_length(priority: &str, length: u64) {
    gauge!(QUEUE_LENGTH, "priority" => priority.to_string()).set(length as f64);
}

pub fn record_reaper_recovery(priority: &str) {
    counter!(REAPER_RECOVERIES, "priority" => priority.to_string()).increment(1);
}

pub fn record_admission_accepted() {
    counter!(ADMISSION_ACCEPTED).increment(1);
}

pub fn record_admission_denied() {
    counter!(ADMISSION_DENIED).increment(1);
}

pub fn record_hook_delivered(subscription_id: &str) {
    counter!(HOOK_DELIVERED, "subscription" => subscription_id.to_string()).increment(1);
}

pub fn record_hook_failed(subscription_id: &str) {
    counter!(HOOK_FAILED, "subscription" => subscription_id.to_string()).increment(1);
}

pub fn record_hook_dead_lettered(subscription_id: &str) {
    counter!(HOOK_DEAD_LETTERED, "subscription" => subscription_id.to_string()).increment(1);
}

pub fn record_in_flight(count: usize) {
    gauge!(IN_FLIGHT_JOBS).set(count as f64);
}

/// A coarse in-process duration histogram for the `bench` admin command, so
/// its p50/p95 figures come from measured execution durations rather than
/// sampling job `created_at`.
#[derive(Debug, Default)]
pub struct DurationHistogram {
    samples_ms: Vec<u64>,
}

impl DurationHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, duration: std::time::Duration) {
        self.samples_ms.push(duration.as_millis() as u64);
    }

    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.samples_ms.is_empty() {
            return None;
        }
        let mut sorted = self.samples_ms.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(idx).copied()
    }

    pub fn len(&self) -> usize {
        self.samples_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples_ms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn percentile_of_empty_histogram_is_none() {
        let hist = DurationHistogram::new();
        assert_eq!(hist.percentile(0.5), None);
    }

    #[test]
    fn percentile_picks_expected_bucket() {
        let mut hist = DurationHistogram::new();
        for ms in [10, 20, 30, 40, 50, 60, 70, 80, 90, 100] {
            hist.record(Duration::from_millis(ms));
        }
        assert_eq!(hist.percentile(0.5), Some(60));
        assert_eq!(hist.percentile(0.95), Some(100));
    }
}
