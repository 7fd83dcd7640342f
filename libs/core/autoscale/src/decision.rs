//! The autoscaler's decision function: a pure mapping from backlog/latency
//! inputs to a desired replica count. No I/O here so it is unit-testable in
//! isolation from the sampling loop that calls it, per the decision/
//! actuation split this spec requires.

use std::time::Duration;

/// An optional latency-based floor on top of the backlog-derived target.
#[derive(Debug, Clone, Copy)]
pub struct LatencySlo {
    /// The percentile this observation was sampled at (informational only;
    /// the caller is responsible for actually computing that percentile).
    pub percentile: f64,
    pub target_ms: u64,
}

/// Everything the decision function needs for one tick. Carries no
/// connection handle or clock - `now` and `last_scale_time` are passed in
/// explicitly so the function is deterministic and side-effect free.
#[derive(Debug, Clone, Copy)]
pub struct ScalingInputs {
    pub backlog: u64,
    /// Measured latency at `latency_slo.percentile`, if an SLO is configured.
    pub measured_latency_ms: Option<u64>,
    pub current_replicas: u32,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_backlog_per_worker: u64,
    pub latency_slo: Option<LatencySlo>,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
    /// Elapsed time since the last scaling action; `None` if this pool has
    /// never scaled.
    pub since_last_scale: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
    Unchanged,
}

#[derive(Debug, Clone, Copy)]
pub struct ScalingDecision {
    pub desired_replicas: u32,
    pub direction: ScaleDirection,
    /// Set when a cooldown suppressed an otherwise-indicated change.
    pub cooldown_active: bool,
}

/// Compute the desired replica count for one tick:
///
/// 1. cooldown in the direction of change suppresses scaling entirely;
/// 2. `desired = ceil(backlog / target_backlog_per_worker)`;
/// 3. a breached latency SLO raises `desired` further, proportionally to
///    how far over target the measured latency is;
/// 4. clamp to `[min, max]`.
pub fn decide(inputs: ScalingInputs) -> ScalingDecision {
    let backlog_desired = ceil_div(inputs.backlog, inputs.target_backlog_per_worker.max(1));

    let mut desired = backlog_desired.max(inputs.min_replicas as u64);

    if let (Some(slo), Some(measured_ms)) = (inputs.latency_slo, inputs.measured_latency_ms) {
        if measured_ms > slo.target_ms && slo.target_ms > 0 {
            let factor = measured_ms as f64 / slo.target_ms as f64;
            let latency_desired = (inputs.current_replicas as f64 * factor).ceil() as u64;
            desired = desired.max(latency_desired);
        }
    }

    let clamped = desired.clamp(inputs.min_replicas as u64, inputs.max_replicas as u64) as u32;

    let direction = match clamped.cmp(&inputs.current_replicas) {
        std::cmp::Ordering::Greater => ScaleDirection::Up,
        std::cmp::Ordering::Less => ScaleDirection::Down,
        std::cmp::Ordering::Equal => ScaleDirection::Unchanged,
    };

    let cooldown = match direction {
        ScaleDirection::Up => inputs.scale_up_cooldown,
        ScaleDirection::Down => inputs.scale_down_cooldown,
        ScaleDirection::Unchanged => Duration::ZERO,
    };

    let cooldown_active = direction != ScaleDirection::Unchanged
        && inputs
            .since_last_scale
            .is_some_and(|elapsed| elapsed < cooldown);

    if cooldown_active {
        return ScalingDecision {
            desired_replicas: inputs.current_replicas,
            direction: ScaleDirection::Unchanged,
            cooldown_active: true,
        };
    }

    ScalingDecision {
        desired_replicas: clamped,
        direction,
        cooldown_active: false,
    }
}

fn ceil_div(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ScalingInputs {
        ScalingInputs {
            backlog: 0,
            measured_latency_ms: None,
            current_replicas: 2,
            min_replicas: 1,
            max_replicas: 10,
            target_backlog_per_worker: 100,
            latency_slo: None,
            scale_up_cooldown: Duration::from_secs(60),
            scale_down_cooldown: Duration::from_secs(300),
            since_last_scale: None,
        }
    }

    #[test]
    fn scales_up_from_backlog() {
        let inputs = ScalingInputs {
            backlog: 950,
            ..base()
        };
        let decision = decide(inputs);
        assert_eq!(decision.desired_replicas, 10);
        assert_eq!(decision.direction, ScaleDirection::Up);
    }

    #[test]
    fn clamps_to_max_when_current_equals_max_and_desired_higher() {
        let inputs = ScalingInputs {
            backlog: 100_000,
            current_replicas: 10,
            max_replicas: 10,
            ..base()
        };
        let decision = decide(inputs);
        assert_eq!(decision.desired_replicas, 10);
        assert_eq!(decision.direction, ScaleDirection::Unchanged);
    }

    #[test]
    fn clamps_to_min_when_backlog_is_zero() {
        let inputs = ScalingInputs {
            backlog: 0,
            current_replicas: 5,
            min_replicas: 1,
            ..base()
        };
        let decision = decide(inputs);
        assert_eq!(decision.desired_replicas, 1);
        assert_eq!(decision.direction, ScaleDirection::Down);
    }

    #[test]
    fn latency_slo_raises_desired_above_backlog_alone() {
        let inputs = ScalingInputs {
            backlog: 100, // backlog alone wants 1 replica
            current_replicas: 2,
            measured_latency_ms: Some(400),
            latency_slo: Some(LatencySlo {
                percentile: 0.95,
                target_ms: 200,
            }),
            ..base()
        };
        let decision = decide(inputs);
        // factor = 2.0, latency_desired = ceil(2 * 2.0) = 4
        assert_eq!(decision.desired_replicas, 4);
        assert_eq!(decision.direction, ScaleDirection::Up);
    }

    #[test]
    fn latency_within_slo_does_not_raise_desired() {
        let inputs = ScalingInputs {
            backlog: 100,
            current_replicas: 2,
            measured_latency_ms: Some(50),
            latency_slo: Some(LatencySlo {
                percentile: 0.95,
                target_ms: 200,
            }),
            ..base()
        };
        let decision = decide(inputs);
        assert_eq!(decision.desired_replicas, 2);
        assert_eq!(decision.direction, ScaleDirection::Unchanged);
    }

    #[test]
    fn cooldown_suppresses_scale_up() {
        let inputs = ScalingInputs {
            backlog: 950,
            since_last_scale: Some(Duration::from_secs(10)),
            ..base()
        };
        let decision = decide(inputs);
        assert_eq!(decision.desired_replicas, 2);
        assert!(decision.cooldown_active);
    }

    #[test]
    fn cooldown_elapsed_allows_scale_up() {
        let inputs = ScalingInputs {
            backlog: 950,
            since_last_scale: Some(Duration::from_secs(61)),
            ..base()
        };
        let decision = decide(inputs);
        assert_eq!(decision.desired_replicas, 10);
        assert!(!decision.cooldown_active);
    }

    #[test]
    fn scale_down_has_its_own_longer_cooldown() {
        let inputs = ScalingInputs {
            backlog: 0,
            current_replicas: 5,
            since_last_scale: Some(Duration::from_secs(61)), // past scale-up cooldown, not scale-down
            ..base()
        };
        let decision = decide(inputs);
        assert_eq!(decision.desired_replicas, 5);
        assert!(decision.cooldown_active);
    }

    #[test]
    fn unchanged_direction_never_counts_as_cooldown_active() {
        let inputs = ScalingInputs {
            backlog: 200,
            current_replicas: 2,
            ..base()
        };
        let decision = decide(inputs);
        assert_eq!(decision.direction, ScaleDirection::Unchanged);
        assert!(!decision.cooldown_active);
    }
}
