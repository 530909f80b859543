//! Kubernetes-backed cluster client

use super::convert::{node_snapshot, pod_snapshot};
use super::ClusterClient;
use crate::error::ClusterError;
use crate::models::{NodeSnapshot, PodSnapshot};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

/// Field manager recorded on patches made by the autoscaler
pub const FIELD_MANAGER: &str = "node-autoscaler";

/// Cluster client reading and writing through the Kubernetes API.
/// Every call goes to the API server; nothing is cached between ticks.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster service account or the local kubeconfig
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list_pods(&self) -> Result<Vec<PodSnapshot>, ClusterError> {
        let pods = self.pods().list(&ListParams::default()).await?;
        debug!(count = pods.items.len(), "Listed pods");
        Ok(pods.items.iter().map(pod_snapshot).collect())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, ClusterError> {
        let nodes = self.nodes().list(&ListParams::default()).await?;
        debug!(count = nodes.items.len(), "Listed nodes");
        Ok(nodes.items.iter().map(node_snapshot).collect())
    }

    async fn set_unschedulable(
        &self,
        node_name: &str,
        unschedulable: bool,
    ) -> Result<(), ClusterError> {
        let patch = json!({
            "spec": {
                "unschedulable": unschedulable
            }
        });
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        self.nodes()
            .patch(node_name, &params, &Patch::Merge(&patch))
            .await?;

        info!(node = %node_name, unschedulable, "Updated node schedulability");
        Ok(())
    }

    async fn delete_node(&self, node_name: &str) -> Result<(), ClusterError> {
        self.nodes()
            .delete(node_name, &DeleteParams::default())
            .await?;

        info!(node = %node_name, "Deleted node object");
        Ok(())
    }
}
