//! Scale decision policy
//!
//! Unschedulable pods are the stronger signal: when any exist, the decision
//! is a scale-up sized from the stuck pods alone, so already-placed workload
//! can never vote the pool down while capacity is short.

use super::capacity::{
    aggregate_demand, clamp_for_scale_down, clamp_for_scale_up, required_node_count,
};
use crate::models::{Demand, NodeProfile, PodSnapshot, ScaleDecision};
use serde::Serialize;

/// Full working of one policy evaluation, kept for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub decision: ScaleDecision,
    /// Demand the decision was computed from
    pub demand: Demand,
    /// Node count before clamping
    pub required: i64,
    pub unschedulable_pods: usize,
    pub current_workers: usize,
}

/// Evaluate the pod set against the current worker count
pub fn evaluate(pods: &[PodSnapshot], current_workers: usize, profile: &NodeProfile) -> Evaluation {
    let (unschedulable, _scheduled): (Vec<&PodSnapshot>, Vec<&PodSnapshot>) =
        pods.iter().partition(|pod| pod.is_unschedulable());

    if !unschedulable.is_empty() {
        let demand = aggregate_demand(unschedulable.iter().copied());
        let required = required_node_count(&demand, profile);
        return Evaluation {
            decision: ScaleDecision::ScaleUp {
                count: clamp_for_scale_up(required, profile),
            },
            demand,
            required,
            unschedulable_pods: unschedulable.len(),
            current_workers,
        };
    }

    let demand = aggregate_demand(pods);
    let required = required_node_count(&demand, profile);
    let target = clamp_for_scale_down(required, profile);

    let decision = if target == current_workers as i64 {
        ScaleDecision::NoOp
    } else {
        ScaleDecision::ScaleDown {
            target: i32::try_from(target).unwrap_or(i32::MAX),
        }
    };

    Evaluation {
        decision,
        demand,
        required,
        unschedulable_pods: 0,
        current_workers,
    }
}

/// Decide how the pool should change this tick
pub fn decide(pods: &[PodSnapshot], current_workers: usize, profile: &NodeProfile) -> ScaleDecision {
    evaluate(pods, current_workers, profile).decision
}
