//! Sampling control loop: reads backlog/latency off the keyspace each tick,
//! calls the pure [`decide`] function, logs the decision, and emits it to
//! whatever external actuator is listening. No resize actually happens here
//! - actuation is an external orchestration concern.

use queue_core::PriorityMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::info;

use crate::decision::{decide, LatencySlo, ScalingDecision, ScalingInputs};

/// A source of per-queue latency samples, decoupled from any one worker
/// process's in-memory histogram so the autoscaler can run standalone.
pub trait LatencySource: Send + Sync {
    /// Latency in milliseconds at the configured percentile for `priority`,
    /// or `None` if no samples have been recorded yet.
    fn latency_ms(&self, priority: &str) -> Option<u64>;
}

/// A `LatencySource` that always reports no data - useful when the
/// autoscaler should size purely off backlog.
pub struct NoLatencyData;

impl LatencySource for NoLatencyData {
    fn latency_ms(&self, _priority: &str) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    pub priority: String,
    pub tick_interval: Duration,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_backlog_per_worker: u64,
    pub latency_slo: Option<LatencySlo>,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
}

/// Emitted once per tick. Represents a recommendation, not an applied
/// change - an external orchestrator is responsible for actually resizing
/// the pool.
#[derive(Debug, Clone, Copy)]
pub struct ScalingEvent {
    pub decision: ScalingDecision,
    pub backlog: u64,
}

pub struct Autoscaler<L: LatencySource> {
    conn: ConnectionManager,
    prefix: String,
    priorities: PriorityMap,
    cfg: AutoscalerConfig,
    latency: L,
    current_replicas: u32,
    last_scale_time: Option<Instant>,
}

impl<L: LatencySource> Autoscaler<L> {
    pub fn new(
        conn: ConnectionManager,
        prefix: impl Into<String>,
        priorities: PriorityMap,
        cfg: AutoscalerConfig,
        latency: L,
        initial_replicas: u32,
    ) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            priorities,
            cfg,
            latency,
            current_replicas: initial_replicas,
            last_scale_time: None,
        }
    }

    /// Run one tick: sample backlog and latency, decide, log, return the
    /// event. Public so it can be driven deterministically from tests or
    /// an external actuator loop instead of only the `run` ticker.
    pub async fn tick(&mut self) -> Result<ScalingEvent, redis::RedisError> {
        let queue = self
            .priorities
            .queue_for(&self.cfg.priority)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:q:{}", self.prefix, self.cfg.priority));

        let backlog: u64 = self.conn.llen(&queue).await?;
        let measured_latency_ms = self.latency.latency_ms(&self.cfg.priority);

        let since_last_scale = self.last_scale_time.map(|t| t.elapsed());

        let inputs = ScalingInputs {
            backlog,
            measured_latency_ms,
            current_replicas: self.current_replicas,
            min_replicas: self.cfg.min_replicas,
            max_replicas: self.cfg.max_replicas,
            target_backlog_per_worker: self.cfg.target_backlog_per_worker,
            latency_slo: self.cfg.latency_slo,
            scale_up_cooldown: self.cfg.scale_up_cooldown,
            scale_down_cooldown: self.cfg.scale_down_cooldown,
            since_last_scale,
        };

        let decision = decide(inputs);

        info!(
            priority = %self.cfg.priority,
            backlog,
            measured_latency_ms,
            current_replicas = self.current_replicas,
            desired_replicas = decision.desired_replicas,
            direction = ?decision.direction,
            cooldown_active = decision.cooldown_active,
            "autoscaler tick"
        );

        if !decision.cooldown_active && decision.desired_replicas != self.current_replicas {
            self.current_replicas = decision.desired_replicas;
            self.last_scale_time = Some(Instant::now());
        }

        Ok(ScalingEvent { decision, backlog })
    }

    /// Tick on `cfg.tick_interval` until `shutdown_rx` reports `true`.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if let Err(e) = self.tick().await {
                tracing::warn!(error = %e, "autoscaler tick failed to sample backlog");
            }
        }
    }
}
