//! Demand aggregation and node-count arithmetic

use crate::models::{Demand, NodeProfile, PodSnapshot};

/// Sum CPU and memory requests over every container of every pod.
/// Missing requests count as zero.
pub fn aggregate_demand<'a, I>(pods: I) -> Demand
where
    I: IntoIterator<Item = &'a PodSnapshot>,
{
    let mut demand = Demand::default();
    for pod in pods {
        for container in &pod.containers {
            demand += Demand {
                cpu: container.cpu_cores.unwrap_or(0.0),
                memory: container.memory_bytes.unwrap_or(0),
            };
        }
    }
    demand
}

/// Number of nodes needed to hold `demand`.
///
/// CPU rounds up, memory uses truncating division. The larger of the two wins.
pub fn required_node_count(demand: &Demand, profile: &NodeProfile) -> i64 {
    let cpu_nodes = if profile.cpu_capacity_per_node > 0.0 {
        (demand.cpu / profile.cpu_capacity_per_node).ceil() as i64
    } else {
        0
    };
    let memory_nodes = demand
        .memory
        .checked_div(profile.memory_capacity_per_node)
        .unwrap_or(0);

    cpu_nodes.max(memory_nodes)
}

pub fn clamp_for_scale_up(required: i64, profile: &NodeProfile) -> i64 {
    required.min(profile.max_nodes)
}

pub fn clamp_for_scale_down(required: i64, profile: &NodeProfile) -> i64 {
    required.max(profile.min_nodes)
}

/// Nodes a scale-up may actually add without the observed pool passing
/// `max_nodes`. Zero or less means there is no room.
pub fn scale_up_headroom(count: i64, current_workers: usize, profile: &NodeProfile) -> i64 {
    count.min(profile.max_nodes - current_workers as i64)
}
