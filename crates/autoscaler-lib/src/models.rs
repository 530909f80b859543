//! Core data models for the node autoscaler

use crate::error::ProfileError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};

/// Label marking control-plane nodes; nodes carrying it are never scaled
pub const DEFAULT_CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Shape of a single worker node and the bounds of the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeProfile {
    /// Allocatable CPU per node, in cores
    pub cpu_capacity_per_node: f64,
    /// Allocatable memory per node, in bytes
    pub memory_capacity_per_node: i64,
    pub min_nodes: i64,
    pub max_nodes: i64,
}

impl Default for NodeProfile {
    fn default() -> Self {
        Self {
            cpu_capacity_per_node: 2.0,
            memory_capacity_per_node: 7_816_684_000,
            min_nodes: 1,
            max_nodes: 3,
        }
    }
}

impl NodeProfile {
    /// Check the profile invariants. Called when configuration is loaded;
    /// the capacity calculator itself never validates.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if !self.cpu_capacity_per_node.is_finite() || self.cpu_capacity_per_node <= 0.0 {
            return Err(ProfileError::InvalidCpuCapacity(self.cpu_capacity_per_node));
        }
        if self.memory_capacity_per_node <= 0 {
            return Err(ProfileError::InvalidMemoryCapacity(
                self.memory_capacity_per_node,
            ));
        }
        if self.min_nodes < 0 || self.max_nodes < 0 {
            return Err(ProfileError::NegativeBounds {
                min: self.min_nodes,
                max: self.max_nodes,
            });
        }
        if self.min_nodes > self.max_nodes {
            return Err(ProfileError::InvertedBounds {
                min: self.min_nodes,
                max: self.max_nodes,
            });
        }
        Ok(())
    }
}

/// Whether the scheduler managed to place a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingState {
    Scheduled,
    Unschedulable,
}

/// Resource requests of a single container. `None` means no request was set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerRequests {
    pub cpu_cores: Option<f64>,
    pub memory_bytes: Option<i64>,
}

impl ContainerRequests {
    pub fn new(cpu_cores: f64, memory_bytes: i64) -> Self {
        Self {
            cpu_cores: Some(cpu_cores),
            memory_bytes: Some(memory_bytes),
        }
    }
}

/// Read-only view of a pod at decision time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub name: String,
    pub namespace: String,
    pub containers: Vec<ContainerRequests>,
    pub scheduling_state: SchedulingState,
}

impl PodSnapshot {
    pub fn is_unschedulable(&self) -> bool {
        self.scheduling_state == SchedulingState::Unschedulable
    }
}

/// Read-only view of a cluster node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl NodeSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            created_at: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// A node is a worker unless it carries the control-plane label
    pub fn is_worker(&self, control_plane_label: &str) -> bool {
        !self.labels.contains_key(control_plane_label)
    }
}

/// Aggregate resource demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    /// CPU in cores
    pub cpu: f64,
    /// Memory in bytes
    pub memory: i64,
}

impl Add for Demand {
    type Output = Demand;

    fn add(self, rhs: Demand) -> Demand {
        Demand {
            cpu: self.cpu + rhs.cpu,
            memory: self.memory.saturating_add(rhs.memory),
        }
    }
}

impl AddAssign for Demand {
    fn add_assign(&mut self, rhs: Demand) {
        *self = *self + rhs;
    }
}

/// Outcome of one policy evaluation. Lives for a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScaleDecision {
    /// Add `count` nodes to the pool
    ScaleUp { count: i64 },
    /// Shrink the pool to `target` worker nodes
    ScaleDown { target: i32 },
    NoOp,
}

impl fmt::Display for ScaleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleDecision::ScaleUp { count } => write!(f, "scale-up(+{})", count),
            ScaleDecision::ScaleDown { target } => write!(f, "scale-down(to {})", target),
            ScaleDecision::NoOp => write!(f, "no-op"),
        }
    }
}

/// Progress of a node through removal:
/// `Running -> Cordoned -> Drained -> Deprovisioned -> Deleted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeLifecycleState {
    Running,
    Cordoned,
    Drained,
    Deprovisioned,
    Deleted,
}

impl NodeLifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLifecycleState::Running => "running",
            NodeLifecycleState::Cordoned => "cordoned",
            NodeLifecycleState::Drained => "drained",
            NodeLifecycleState::Deprovisioned => "deprovisioned",
            NodeLifecycleState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for NodeLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
