use super::*;
use crate::cluster::DrainPolicy;
use crate::fakes::{calls, CallLog, FakeCluster, FakeDrainer, FakeProvider, RecordingSink};
use crate::models::NodeSnapshot;
use crate::observability::ScalingEvent;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    log: CallLog,
    cluster: Arc<FakeCluster>,
    drainer: Arc<FakeDrainer>,
    provider: Arc<FakeProvider>,
    sink: Arc<RecordingSink>,
}

impl Harness {
    fn new(workers: &[NodeSnapshot]) -> Self {
        Self::with_failures(workers, |_, _, _| {})
    }

    /// Build the fakes, letting the test mark failing nodes first
    fn with_failures(
        workers: &[NodeSnapshot],
        configure: impl FnOnce(&mut FakeCluster, &mut FakeDrainer, &mut FakeProvider),
    ) -> Self {
        let log = CallLog::default();
        let mut cluster = FakeCluster::new(Vec::new(), workers.to_vec(), log.clone());
        let mut drainer = FakeDrainer::new(log.clone());
        let mut provider = FakeProvider::new(log.clone());
        configure(&mut cluster, &mut drainer, &mut provider);

        Self {
            cluster: Arc::new(cluster),
            drainer: Arc::new(drainer),
            provider: Arc::new(provider),
            sink: Arc::new(RecordingSink::default()),
            log,
        }
    }

    fn sequencer(&self, selector: Arc<dyn NodeSelector>) -> NodeLifecycleSequencer {
        NodeLifecycleSequencer::new(
            self.cluster.clone(),
            self.drainer.clone(),
            self.provider.clone(),
            selector,
            DrainPolicy::default(),
            self.sink.clone(),
        )
    }
}

fn workers(names: &[&str]) -> Vec<NodeSnapshot> {
    names.iter().map(|name| NodeSnapshot::new(*name)).collect()
}

fn full_removal(node: &str) -> Vec<String> {
    vec![
        format!("cordon:{}:true", node),
        format!("drain:{}", node),
        format!("scale_down:{}", node),
        format!("delete:{}", node),
    ]
}

#[tokio::test]
async fn test_removes_nodes_in_full_sequence() {
    let nodes = workers(&["node-1", "node-2", "node-3"]);
    let harness = Harness::new(&nodes);

    let report = harness.sequencer(Arc::new(CacheOrder)).scale_down(&nodes, 1).await;

    assert_eq!(report.removed(), 2);
    assert_eq!(report.failed(), 0);

    let mut expected = full_removal("node-1");
    expected.extend(full_removal("node-2"));
    assert_eq!(calls(&harness.log), expected);
}

#[tokio::test]
async fn test_drain_failure_parks_node_and_continues() {
    let nodes = workers(&["node-1", "node-2", "node-3", "node-4"]);
    let harness = Harness::with_failures(&nodes, |_, drainer, _| {
        drainer.fail.insert("node-2".to_string());
    });

    // Target 1 of 4 workers: the first three are selected
    let report = harness.sequencer(Arc::new(CacheOrder)).scale_down(&nodes, 1).await;

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.removed(), 2);

    let node_2 = report.outcome("node-2").unwrap();
    assert_eq!(node_2.state, NodeLifecycleState::Cordoned);
    let failure = node_2.failure.as_ref().unwrap();
    assert_eq!(failure.step, LifecycleStep::Drain);
    assert!(matches!(failure.error, StepError::Cluster(_)));

    for removed in ["node-1", "node-3"] {
        assert_eq!(report.outcome(removed).unwrap().state, NodeLifecycleState::Deleted);
    }

    let mut expected = full_removal("node-1");
    expected.extend(["cordon:node-2:true".to_string(), "drain:node-2".to_string()]);
    expected.extend(full_removal("node-3"));
    assert_eq!(calls(&harness.log), expected);

    // node-2 is still a cluster node, node-1 and node-3 are gone
    let remaining: Vec<String> = harness
        .cluster
        .nodes
        .lock()
        .unwrap()
        .iter()
        .map(|n| n.name.clone())
        .collect();
    assert_eq!(remaining, vec!["node-2", "node-4"]);
}

#[tokio::test]
async fn test_no_surplus_means_no_calls() {
    let nodes = workers(&["node-1", "node-2"]);
    let harness = Harness::new(&nodes);
    let sequencer = harness.sequencer(Arc::new(CacheOrder));

    for target in [2, 3, 100] {
        let report = sequencer.scale_down(&nodes, target).await;
        assert!(report.is_empty());
    }

    assert!(calls(&harness.log).is_empty());
    assert!(harness.sink.events().is_empty());
}

#[tokio::test]
async fn test_deprovision_failure_keeps_node_object() {
    let nodes = workers(&["node-1", "node-2"]);
    let harness = Harness::with_failures(&nodes, |_, _, provider| {
        provider.fail_scale_down.insert("node-1".to_string());
    });

    let report = harness.sequencer(Arc::new(CacheOrder)).scale_down(&nodes, 1).await;

    let outcome = report.outcome("node-1").unwrap();
    assert_eq!(outcome.state, NodeLifecycleState::Drained);
    assert_eq!(outcome.failure.as_ref().unwrap().step, LifecycleStep::Deprovision);
    assert!(!calls(&harness.log).contains(&"delete:node-1".to_string()));

    let events = harness.sink.events();
    assert!(matches!(
        &events[..],
        [ScalingEvent::NodeRemovalFailed { node, state: NodeLifecycleState::Drained, .. }]
            if node == "node-1"
    ));
}

#[tokio::test]
async fn test_cordon_failure_skips_remaining_steps() {
    let nodes = workers(&["node-1"]);
    let harness = Harness::with_failures(&nodes, |cluster, _, _| {
        cluster.fail_cordon.insert("node-1".to_string());
    });

    let report = harness.sequencer(Arc::new(CacheOrder)).scale_down(&nodes, 0).await;

    let outcome = report.outcome("node-1").unwrap();
    assert_eq!(outcome.state, NodeLifecycleState::Running);
    assert_eq!(calls(&harness.log), vec!["cordon:node-1:true"]);
}

#[tokio::test]
async fn test_delete_failure_is_reported_after_deprovision() {
    let nodes = workers(&["node-1"]);
    let harness = Harness::with_failures(&nodes, |cluster, _, _| {
        cluster.fail_delete.insert("node-1".to_string());
    });

    let report = harness.sequencer(Arc::new(CacheOrder)).scale_down(&nodes, 0).await;

    let outcome = report.outcome("node-1").unwrap();
    assert_eq!(outcome.state, NodeLifecycleState::Deprovisioned);
    assert_eq!(outcome.failure.as_ref().unwrap().step, LifecycleStep::Delete);
    assert_eq!(calls(&harness.log), full_removal("node-1"));
}

#[tokio::test]
async fn test_drain_uses_configured_policy() {
    let nodes = workers(&["node-1", "node-2"]);
    let harness = Harness::new(&nodes);

    harness.sequencer(Arc::new(CacheOrder)).scale_down(&nodes, 1).await;

    let policies = harness.drainer.policies.lock().unwrap().clone();
    assert_eq!(policies.len(), 1);
    let policy = &policies[0];
    assert!(!policy.force);
    assert!(policy.ignore_daemon_sets);
    assert!(policy.delete_empty_dir_data);
    assert_eq!(policy.grace_period, Duration::from_secs(10));
    assert_eq!(policy.timeout, Duration::from_secs(10));
}

#[tokio::test]
async fn test_selector_decides_which_nodes_go() {
    let nodes = vec![
        NodeSnapshot::new("keep-1"),
        NodeSnapshot::new("drop-me").with_label(DEFAULT_REMOVAL_LABEL, "true"),
        NodeSnapshot::new("keep-2"),
    ];
    let harness = Harness::new(&nodes);
    let sequencer = harness.sequencer(Arc::new(LabeledFirst::new(DEFAULT_REMOVAL_LABEL)));

    let planned: Vec<&str> = sequencer
        .plan(&nodes, 2)
        .into_iter()
        .map(|n| n.name.as_str())
        .collect();
    assert_eq!(planned, vec!["drop-me"]);

    let report = sequencer.scale_down(&nodes, 2).await;
    assert_eq!(report.removed(), 1);
    assert!(report.outcome("drop-me").unwrap().is_removed());
    assert_eq!(
        harness.sink.events(),
        vec![ScalingEvent::NodeRemoved {
            node: "drop-me".to_string()
        }]
    );
}
