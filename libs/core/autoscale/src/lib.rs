//! Autoscaler: a pure backlog/latency decision function plus a thin
//! sampling control loop. Actuation (actually resizing a worker pool) is an
//! external orchestration concern and is not implemented here - this crate
//! only computes and logs the recommendation.

mod controller;
mod decision;

pub use controller::{Autoscaler, AutoscalerConfig, LatencySource, NoLatencyData, ScalingEvent};
pub use decision::{decide, LatencySlo, ScaleDirection, ScalingDecision, ScalingInputs};
