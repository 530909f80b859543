//! Node drain through the Eviction API
//!
//! Pod filtering follows `kubectl drain`:
//! - mirror (static) pods are left alone
//! - finished pods can always be removed
//! - DaemonSet pods are skipped or block the drain
//! - pods without a controller need `force`
//! - pods with emptyDir volumes need `delete_empty_dir_data`

use super::{DrainPolicy, NodeDrainer};
use crate::error::ClusterError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, EvictParams, ListParams};
use kube::{Client, ResourceExt};
use std::time::Duration;
use tracing::{debug, info};

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// What a drain does with a single pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodDisposition {
    Evict,
    Skip(&'static str),
    Block(String),
}

/// Decide how a pod bound to a draining node is handled
pub fn classify_pod(pod: &Pod, policy: &DrainPolicy) -> PodDisposition {
    if pod.annotations().contains_key(MIRROR_POD_ANNOTATION) {
        return PodDisposition::Skip("mirror pod");
    }

    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    if matches!(phase, Some("Succeeded") | Some("Failed")) {
        return PodDisposition::Evict;
    }

    let controller = pod
        .owner_references()
        .iter()
        .find(|owner| owner.controller == Some(true));

    match controller {
        Some(owner) if owner.kind == "DaemonSet" => {
            if policy.ignore_daemon_sets {
                return PodDisposition::Skip("daemonset-managed pod");
            }
            return PodDisposition::Block("managed by a DaemonSet".to_string());
        }
        None if !policy.force => {
            return PodDisposition::Block(
                "not managed by a controller (force is disabled)".to_string(),
            );
        }
        _ => {}
    }

    let uses_empty_dir = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map(|volumes| volumes.iter().any(|v| v.empty_dir.is_some()))
        .unwrap_or(false);

    if uses_empty_dir && !policy.delete_empty_dir_data {
        return PodDisposition::Block("uses emptyDir local storage".to_string());
    }

    PodDisposition::Evict
}

/// Drains nodes by evicting their pods and waiting for them to go away
#[derive(Clone)]
pub struct KubeDrainer {
    client: Client,
    poll_interval: Duration,
}

impl KubeDrainer {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Interval between eviction retries and deletion checks
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn drain_pods(&self, node_name: &str, policy: &DrainPolicy) -> Result<(), ClusterError> {
        let all_pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        let pods = all_pods.list(&params).await?;

        let mut to_evict = Vec::new();
        let mut blocked = Vec::new();

        for pod in pods.items {
            match classify_pod(&pod, policy) {
                PodDisposition::Evict => to_evict.push(pod),
                PodDisposition::Skip(reason) => {
                    debug!(
                        node = %node_name,
                        pod = %pod.name_any(),
                        reason,
                        "Skipping pod during drain"
                    );
                }
                PodDisposition::Block(reason) => blocked.push(format!(
                    "{}/{}: {}",
                    pod.namespace().unwrap_or_default(),
                    pod.name_any(),
                    reason
                )),
            }
        }

        if !blocked.is_empty() {
            return Err(ClusterError::DrainBlocked {
                node: node_name.to_string(),
                reason: blocked.join("; "),
            });
        }

        info!(node = %node_name, pods = to_evict.len(), "Evicting pods");

        for pod in &to_evict {
            self.evict(pod, policy).await?;
        }
        for pod in &to_evict {
            self.wait_for_deletion(pod).await?;
        }

        Ok(())
    }

    async fn evict(&self, pod: &Pod, policy: &DrainPolicy) -> Result<(), ClusterError> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);

        let params = eviction_params(policy);

        loop {
            match api.evict(&name, &params).await {
                Ok(_) => {
                    debug!(pod = %name, namespace = %namespace, "Evicted pod");
                    return Ok(());
                }
                Err(kube::Error::Api(response)) if response.code == 404 => return Ok(()),
                // A disruption budget is currently blocking this eviction
                Err(kube::Error::Api(response)) if response.code == 429 => {
                    debug!(pod = %name, namespace = %namespace, "Eviction throttled, retrying");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn wait_for_deletion(&self, pod: &Pod) -> Result<(), ClusterError> {
        let namespace = pod.namespace().unwrap_or_default();
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let name = pod.name_any();

        loop {
            match api.get_opt(&name).await? {
                None => return Ok(()),
                // Same name, different pod: the evicted one is gone
                Some(current) if current.uid() != pod.uid() => return Ok(()),
                Some(_) => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

fn eviction_params(policy: &DrainPolicy) -> EvictParams {
    let grace_period = u32::try_from(policy.grace_period.as_secs()).unwrap_or(u32::MAX);
    EvictParams {
        delete_options: Some(DeleteParams {
            grace_period_seconds: Some(grace_period),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl NodeDrainer for KubeDrainer {
    async fn drain(&self, node_name: &str, policy: &DrainPolicy) -> Result<(), ClusterError> {
        match tokio::time::timeout(policy.timeout, self.drain_pods(node_name, policy)).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::DrainTimeout {
                node: node_name.to_string(),
                timeout: policy.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{kube_client, status_body};
    use mockito::{Matcher, Server};
    use serde_json::json;

    const PODS_PATH: &str = "/api/v1/pods";
    const WEB_PATH: &str = "/api/v1/namespaces/shop/pods/web";
    const EVICT_PATH: &str = "/api/v1/namespaces/shop/pods/web/eviction";

    fn pod_from(value: serde_json::Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    fn owned_by(kind: &str) -> serde_json::Value {
        json!([{
            "apiVersion": "apps/v1",
            "kind": kind,
            "name": "owner",
            "uid": "1234",
            "controller": true
        }])
    }

    #[test]
    fn test_replicaset_pod_is_evicted() {
        let pod = pod_from(json!({
            "metadata": { "name": "web", "ownerReferences": owned_by("ReplicaSet") },
            "spec": { "containers": [ { "name": "app" } ] }
        }));
        assert_eq!(classify_pod(&pod, &DrainPolicy::default()), PodDisposition::Evict);
    }

    #[test]
    fn test_daemonset_pod_respects_policy() {
        let pod = pod_from(json!({
            "metadata": { "name": "agent", "ownerReferences": owned_by("DaemonSet") },
            "spec": { "containers": [ { "name": "agent" } ] }
        }));

        assert!(matches!(
            classify_pod(&pod, &DrainPolicy::default()),
            PodDisposition::Skip(_)
        ));

        let strict = DrainPolicy {
            ignore_daemon_sets: false,
            ..DrainPolicy::default()
        };
        assert!(matches!(classify_pod(&pod, &strict), PodDisposition::Block(_)));
    }

    #[test]
    fn test_mirror_pod_is_skipped() {
        let pod = pod_from(json!({
            "metadata": {
                "name": "kube-proxy",
                "annotations": { "kubernetes.io/config.mirror": "abc" }
            },
            "spec": { "containers": [ { "name": "proxy" } ] }
        }));
        assert!(matches!(
            classify_pod(&pod, &DrainPolicy::default()),
            PodDisposition::Skip(_)
        ));
    }

    #[test]
    fn test_unmanaged_pod_needs_force() {
        let pod = pod_from(json!({
            "metadata": { "name": "bare" },
            "spec": { "containers": [ { "name": "app" } ] }
        }));

        assert!(matches!(
            classify_pod(&pod, &DrainPolicy::default()),
            PodDisposition::Block(_)
        ));

        let forced = DrainPolicy {
            force: true,
            ..DrainPolicy::default()
        };
        assert_eq!(classify_pod(&pod, &forced), PodDisposition::Evict);
    }

    #[test]
    fn test_empty_dir_pod_respects_policy() {
        let pod = pod_from(json!({
            "metadata": { "name": "cache", "ownerReferences": owned_by("StatefulSet") },
            "spec": {
                "containers": [ { "name": "app" } ],
                "volumes": [ { "name": "scratch", "emptyDir": {} } ]
            }
        }));

        assert_eq!(classify_pod(&pod, &DrainPolicy::default()), PodDisposition::Evict);

        let keep_data = DrainPolicy {
            delete_empty_dir_data: false,
            ..DrainPolicy::default()
        };
        assert!(matches!(classify_pod(&pod, &keep_data), PodDisposition::Block(_)));
    }

    #[test]
    fn test_finished_pod_is_always_removable() {
        let pod = pod_from(json!({
            "metadata": { "name": "job-run" },
            "spec": { "containers": [ { "name": "job" } ] },
            "status": { "phase": "Succeeded" }
        }));
        assert_eq!(classify_pod(&pod, &DrainPolicy::default()), PodDisposition::Evict);
    }

    #[test]
    fn test_eviction_grace_period() {
        let params = eviction_params(&DrainPolicy::default());
        let delete = params.delete_options.unwrap();
        assert_eq!(delete.grace_period_seconds, Some(10));

        let huge = DrainPolicy {
            grace_period: Duration::from_secs(u64::from(u32::MAX) + 5),
            ..DrainPolicy::default()
        };
        let delete = eviction_params(&huge).delete_options.unwrap();
        assert_eq!(delete.grace_period_seconds, Some(u32::MAX));
    }

    fn web_pod(uid: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "web",
                "namespace": "shop",
                "uid": uid,
                "ownerReferences": owned_by("ReplicaSet")
            },
            "spec": { "nodeName": "node-1", "containers": [ { "name": "app" } ] }
        })
    }

    fn pod_list(pods: Vec<serde_json::Value>) -> String {
        json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": { "resourceVersion": "1" },
            "items": pods
        })
        .to_string()
    }

    async fn mock_node_pods(server: &mut Server, pods: Vec<serde_json::Value>) -> mockito::Mock {
        server
            .mock("GET", PODS_PATH)
            .match_query(Matcher::UrlEncoded(
                "fieldSelector".into(),
                "spec.nodeName=node-1".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(pod_list(pods))
            .create_async()
            .await
    }

    async fn mock_eviction(server: &mut Server, code: u16, hits: usize) -> mockito::Mock {
        let reason = if code == 429 { "TooManyRequests" } else { "" };
        server
            .mock("POST", EVICT_PATH)
            .match_query(Matcher::Any)
            .with_status(code as usize)
            .with_header("content-type", "application/json")
            .with_body(status_body(code, reason))
            .expect(hits)
            .create_async()
            .await
    }

    async fn mock_pod_lookup(server: &mut Server, uid: &str, hits: usize) -> mockito::Mock {
        server
            .mock("GET", WEB_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(web_pod(uid).to_string())
            .expect(hits)
            .create_async()
            .await
    }

    async fn mock_pod_gone(server: &mut Server) -> mockito::Mock {
        server
            .mock("GET", WEB_PATH)
            .match_query(Matcher::Any)
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(status_body(404, "NotFound"))
            .expect(1)
            .create_async()
            .await
    }

    fn drainer(server: &Server) -> KubeDrainer {
        KubeDrainer::new(kube_client(server)).with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_drain_waits_until_evicted_pod_is_gone() {
        let mut server = Server::new_async().await;
        mock_node_pods(&mut server, vec![web_pod("uid-1")]).await;
        let eviction = mock_eviction(&mut server, 201, 1).await;
        let still_running = mock_pod_lookup(&mut server, "uid-1", 2).await;
        let gone = mock_pod_gone(&mut server).await;

        drainer(&server)
            .drain("node-1", &DrainPolicy::default())
            .await
            .unwrap();

        eviction.assert_async().await;
        still_running.assert_async().await;
        gone.assert_async().await;
    }

    #[tokio::test]
    async fn test_drain_treats_replaced_pod_as_gone() {
        let mut server = Server::new_async().await;
        mock_node_pods(&mut server, vec![web_pod("uid-1")]).await;
        mock_eviction(&mut server, 201, 1).await;
        let replacement = mock_pod_lookup(&mut server, "uid-2", 1).await;

        drainer(&server)
            .drain("node-1", &DrainPolicy::default())
            .await
            .unwrap();

        replacement.assert_async().await;
    }

    #[tokio::test]
    async fn test_drain_retries_throttled_eviction() {
        let mut server = Server::new_async().await;
        mock_node_pods(&mut server, vec![web_pod("uid-1")]).await;
        let throttled = mock_eviction(&mut server, 429, 2).await;
        let accepted = mock_eviction(&mut server, 201, 1).await;
        mock_pod_gone(&mut server).await;

        drainer(&server)
            .drain("node-1", &DrainPolicy::default())
            .await
            .unwrap();

        throttled.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn test_drain_times_out_while_eviction_is_blocked() {
        let mut server = Server::new_async().await;
        mock_node_pods(&mut server, vec![web_pod("uid-1")]).await;
        let throttled = server
            .mock("POST", EVICT_PATH)
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(status_body(429, "TooManyRequests"))
            .expect_at_least(2)
            .create_async()
            .await;

        let policy = DrainPolicy {
            timeout: Duration::from_millis(300),
            ..DrainPolicy::default()
        };
        let err = drainer(&server).drain("node-1", &policy).await.unwrap_err();

        match err {
            ClusterError::DrainTimeout { node, timeout } => {
                assert_eq!(node, "node-1");
                assert_eq!(timeout, Duration::from_millis(300));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        throttled.assert_async().await;
    }

    #[tokio::test]
    async fn test_drain_refuses_unmanaged_pod() {
        let mut server = Server::new_async().await;
        let mut bare = web_pod("uid-1");
        bare["metadata"]
            .as_object_mut()
            .unwrap()
            .remove("ownerReferences");
        mock_node_pods(&mut server, vec![bare]).await;
        let eviction = mock_eviction(&mut server, 201, 0).await;

        let err = drainer(&server)
            .drain("node-1", &DrainPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::DrainBlocked { .. }));
        eviction.assert_async().await;
    }
}
