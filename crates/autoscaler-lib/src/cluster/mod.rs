//! Cluster API access
//!
//! The reconciliation core only sees the cluster through [`ClusterClient`]
//! and [`NodeDrainer`]. The Kubernetes-backed implementations live in this
//! module as well, together with the conversion of API objects into
//! snapshots.
//!
//! The controller assumes it is the only writer scaling the pool. Nothing
//! here locks against a second autoscaler acting on the same nodes.

mod convert;
mod drain;
mod kube_client;
mod quantity;

pub use convert::{is_unschedulable, node_snapshot, pod_snapshot};
pub use drain::{classify_pod, KubeDrainer, PodDisposition};
pub use kube_client::KubeCluster;
pub use quantity::{cpu_cores, memory_bytes, parse_quantity};

use crate::error::ClusterError;
use crate::models::{NodeSnapshot, PodSnapshot};
use std::time::Duration;

pub use async_trait::async_trait;

/// Read and write access to cluster objects
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List every pod in the cluster
    async fn list_pods(&self) -> Result<Vec<PodSnapshot>, ClusterError>;

    /// List every node in the cluster, control-plane nodes included
    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, ClusterError>;

    /// Mark a node (un)schedulable
    async fn set_unschedulable(&self, node_name: &str, unschedulable: bool)
        -> Result<(), ClusterError>;

    /// Delete the node object
    async fn delete_node(&self, node_name: &str) -> Result<(), ClusterError>;
}

/// Removes workload from a node before it is deprovisioned
#[async_trait]
pub trait NodeDrainer: Send + Sync {
    async fn drain(&self, node_name: &str, policy: &DrainPolicy) -> Result<(), ClusterError>;
}

/// How pods are removed from a node being drained
#[derive(Debug, Clone, PartialEq)]
pub struct DrainPolicy {
    /// Also delete pods that no controller will recreate
    pub force: bool,
    /// Grace period given to each evicted pod
    pub grace_period: Duration,
    /// Leave DaemonSet pods in place instead of refusing to drain
    pub ignore_daemon_sets: bool,
    /// Evict pods using emptyDir volumes, losing that data
    pub delete_empty_dir_data: bool,
    /// Upper bound for the whole drain
    pub timeout: Duration,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            force: false,
            grace_period: Duration::from_secs(10),
            ignore_daemon_sets: true,
            delete_empty_dir_data: true,
            timeout: Duration::from_secs(10),
        }
    }
}
