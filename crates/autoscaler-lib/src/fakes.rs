//! In-memory cluster, drainer, provider and event sink for unit tests

use crate::cluster::{ClusterClient, DrainPolicy, NodeDrainer};
use crate::error::{ClusterError, ProviderError};
use crate::models::{NodeSnapshot, PodSnapshot};
use crate::observability::{EventSink, ScalingEvent};
use crate::provider::CloudProvider;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("status {}", code),
        reason: "Test".to_string(),
        code,
    })
}

/// Kubernetes client talking plain HTTP to a mock API server
pub fn kube_client(server: &mockito::Server) -> kube::Client {
    let mut config = kube::Config::new(server.url().parse().unwrap());
    // Plain HTTP only; skip loading the host's CA bundle
    config.root_cert = Some(Vec::new());
    kube::Client::try_from(config).unwrap()
}

/// `Status` body the API server returns with an error code
pub fn status_body(code: u16, reason: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": if code < 400 { "Success" } else { "Failure" },
        "message": reason,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// Ordered record of every mutating call, shared by all fakes of a test
pub type CallLog = Arc<Mutex<Vec<String>>>;

fn push(log: &CallLog, call: String) {
    log.lock().unwrap().push(call);
}

#[derive(Default)]
pub struct FakeCluster {
    pub pods: Mutex<Vec<PodSnapshot>>,
    pub nodes: Mutex<Vec<NodeSnapshot>>,
    pub calls: CallLog,
    pub fail_cordon: HashSet<String>,
    pub fail_delete: HashSet<String>,
    /// HTTP status returned by the next list calls, if any
    pub list_error: Mutex<Option<u16>>,
}

impl FakeCluster {
    pub fn new(pods: Vec<PodSnapshot>, nodes: Vec<NodeSnapshot>, calls: CallLog) -> Self {
        Self {
            pods: Mutex::new(pods),
            nodes: Mutex::new(nodes),
            calls,
            ..Default::default()
        }
    }

    pub fn fail_list_with(&self, code: Option<u16>) {
        *self.list_error.lock().unwrap() = code;
    }

    fn list_result(&self) -> Result<(), ClusterError> {
        match *self.list_error.lock().unwrap() {
            Some(code) => Err(ClusterError::Kube(api_error(code))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_pods(&self) -> Result<Vec<PodSnapshot>, ClusterError> {
        self.list_result()?;
        Ok(self.pods.lock().unwrap().clone())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, ClusterError> {
        self.list_result()?;
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn set_unschedulable(
        &self,
        node_name: &str,
        unschedulable: bool,
    ) -> Result<(), ClusterError> {
        push(&self.calls, format!("cordon:{}:{}", node_name, unschedulable));
        if self.fail_cordon.contains(node_name) {
            return Err(ClusterError::Kube(api_error(409)));
        }
        Ok(())
    }

    async fn delete_node(&self, node_name: &str) -> Result<(), ClusterError> {
        push(&self.calls, format!("delete:{}", node_name));
        if self.fail_delete.contains(node_name) {
            return Err(ClusterError::Kube(api_error(500)));
        }
        self.nodes.lock().unwrap().retain(|n| n.name != node_name);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDrainer {
    pub calls: CallLog,
    pub fail: HashSet<String>,
    pub policies: Mutex<Vec<DrainPolicy>>,
}

impl FakeDrainer {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            ..Default::default()
        }
    }
}

#[async_trait]
impl NodeDrainer for FakeDrainer {
    async fn drain(&self, node_name: &str, policy: &DrainPolicy) -> Result<(), ClusterError> {
        push(&self.calls, format!("drain:{}", node_name));
        self.policies.lock().unwrap().push(policy.clone());
        if self.fail.contains(node_name) {
            return Err(ClusterError::DrainTimeout {
                node: node_name.to_string(),
                timeout: Duration::from_secs(10),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProvider {
    pub calls: CallLog,
    pub fail_scale_down: HashSet<String>,
    /// HTTP status the next scale-up fails with, if any
    pub scale_up_error: Mutex<Option<u16>>,
}

impl FakeProvider {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CloudProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn scale_up(&self, count: i64) -> Result<(), ProviderError> {
        push(&self.calls, format!("scale_up:{}", count));
        match *self.scale_up_error.lock().unwrap() {
            Some(status) => Err(ProviderError::Api {
                status,
                message: "scale-up rejected".to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn scale_down(&self, node_name: &str) -> Result<(), ProviderError> {
        push(&self.calls, format!("scale_down:{}", node_name));
        if self.fail_scale_down.contains(node_name) {
            return Err(ProviderError::InstanceNotFound(node_name.to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ScalingEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ScalingEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: ScalingEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Snapshot of a call log
pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}
