//! Conversion of Kubernetes objects into decision-time snapshots

use super::quantity::{cpu_cores, memory_bytes};
use crate::models::{ContainerRequests, NodeSnapshot, PodSnapshot, SchedulingState};
use k8s_openapi::api::core::v1::{Container, Node, Pod};
use kube::ResourceExt;
use tracing::warn;

/// A pod is unschedulable when the scheduler reported it could not be placed
pub fn is_unschedulable(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.type_ == "PodScheduled"
                    && c.status == "False"
                    && c.reason.as_deref() == Some("Unschedulable")
            })
        })
        .unwrap_or(false)
}

pub fn pod_snapshot(pod: &Pod) -> PodSnapshot {
    let name = pod.name_any();
    let namespace = pod.namespace().unwrap_or_default();

    let containers = pod
        .spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .map(|c| container_requests(&namespace, &name, c))
                .collect()
        })
        .unwrap_or_default();

    let scheduling_state = if is_unschedulable(pod) {
        SchedulingState::Unschedulable
    } else {
        SchedulingState::Scheduled
    };

    PodSnapshot {
        name,
        namespace,
        containers,
        scheduling_state,
    }
}

fn container_requests(namespace: &str, pod_name: &str, container: &Container) -> ContainerRequests {
    let Some(requests) = container
        .resources
        .as_ref()
        .and_then(|resources| resources.requests.as_ref())
    else {
        return ContainerRequests::default();
    };

    let cpu = requests.get("cpu").and_then(|q| {
        let parsed = cpu_cores(q);
        if parsed.is_none() {
            warn!(
                pod = %pod_name,
                namespace = %namespace,
                container = %container.name,
                quantity = %q.0,
                "Ignoring unparseable cpu request"
            );
        }
        parsed
    });

    let memory = requests.get("memory").and_then(|q| {
        let parsed = memory_bytes(q);
        if parsed.is_none() {
            warn!(
                pod = %pod_name,
                namespace = %namespace,
                container = %container.name,
                quantity = %q.0,
                "Ignoring unparseable memory request"
            );
        }
        parsed
    });

    ContainerRequests {
        cpu_cores: cpu,
        memory_bytes: memory,
    }
}

pub fn node_snapshot(node: &Node) -> NodeSnapshot {
    NodeSnapshot {
        name: node.name_any(),
        labels: node.labels().clone(),
        created_at: node.creation_timestamp().map(|t| t.0),
    }
}
