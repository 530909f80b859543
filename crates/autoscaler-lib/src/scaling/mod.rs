//! Capacity estimation and scale decisions
//!
//! Demand is estimated from aggregate resource requests only; there is no
//! per-pod bin-packing or scheduler simulation. All values are recomputed
//! from scratch on every tick.

mod capacity;
mod policy;

pub use capacity::{
    aggregate_demand, clamp_for_scale_down, clamp_for_scale_up, required_node_count,
    scale_up_headroom,
};
pub use policy::{decide, evaluate, Evaluation};
