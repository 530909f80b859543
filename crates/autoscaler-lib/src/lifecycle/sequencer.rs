use super::{LifecycleStep, NodeFailure, NodeOutcome, NodeSelector, ScaleDownReport, StepError};
use crate::cluster::{ClusterClient, DrainPolicy, NodeDrainer};
use crate::models::{NodeLifecycleState, NodeSnapshot};
use crate::observability::{EventSink, ScalerMetrics, ScalingEvent};
use crate::provider::CloudProvider;
use std::sync::Arc;
use tracing::{debug, info};

/// Removes surplus worker nodes one at a time
pub struct NodeLifecycleSequencer {
    cluster: Arc<dyn ClusterClient>,
    drainer: Arc<dyn NodeDrainer>,
    provider: Arc<dyn CloudProvider>,
    selector: Arc<dyn NodeSelector>,
    drain_policy: DrainPolicy,
    events: Arc<dyn EventSink>,
    metrics: ScalerMetrics,
}

impl NodeLifecycleSequencer {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        drainer: Arc<dyn NodeDrainer>,
        provider: Arc<dyn CloudProvider>,
        selector: Arc<dyn NodeSelector>,
        drain_policy: DrainPolicy,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            cluster,
            drainer,
            provider,
            selector,
            drain_policy,
            events,
            metrics: ScalerMetrics::new(),
        }
    }

    /// Nodes a scale-down to `target` would remove, in removal order
    pub fn plan<'a>(&self, workers: &'a [NodeSnapshot], target: i32) -> Vec<&'a NodeSnapshot> {
        let excess = workers.len() as i64 - i64::from(target);
        if excess <= 0 {
            return Vec::new();
        }
        self.selector.select(workers, excess as usize)
    }

    /// Shrink the pool to `target` workers, best effort
    ///
    /// Never fails as a whole: per-node failures are recorded in the report
    /// and the remaining nodes are still processed.
    pub async fn scale_down(&self, workers: &[NodeSnapshot], target: i32) -> ScaleDownReport {
        let selected = self.plan(workers, target);
        if selected.is_empty() {
            debug!(
                workers = workers.len(),
                target, "No surplus nodes to remove"
            );
            return ScaleDownReport::default();
        }

        info!(
            workers = workers.len(),
            target,
            selector = self.selector.name(),
            nodes = ?selected.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
            "Removing surplus nodes"
        );

        let mut report = ScaleDownReport::default();
        for node in selected {
            let outcome = self.remove_node(&node.name).await;
            self.report(&outcome);
            report.outcomes.push(outcome);
        }
        report
    }

    async fn remove_node(&self, node_name: &str) -> NodeOutcome {
        let mut state = NodeLifecycleState::Running;

        for step in [
            LifecycleStep::Cordon,
            LifecycleStep::Drain,
            LifecycleStep::Deprovision,
            LifecycleStep::Delete,
        ] {
            if let Err(error) = self.run_step(step, node_name).await {
                return NodeOutcome {
                    node: node_name.to_string(),
                    state,
                    failure: Some(NodeFailure { step, error }),
                };
            }
            state = step.reaches();
            debug!(node = %node_name, state = %state, "Node advanced");
        }

        NodeOutcome {
            node: node_name.to_string(),
            state,
            failure: None,
        }
    }

    async fn run_step(&self, step: LifecycleStep, node_name: &str) -> Result<(), StepError> {
        match step {
            LifecycleStep::Cordon => self.cluster.set_unschedulable(node_name, true).await?,
            LifecycleStep::Drain => self.drainer.drain(node_name, &self.drain_policy).await?,
            LifecycleStep::Deprovision => self.provider.scale_down(node_name).await?,
            LifecycleStep::Delete => match self.cluster.delete_node(node_name).await {
                // The cloud node controller may already have removed it
                Err(e) if e.is_not_found() => {
                    debug!(node = %node_name, "Node object already gone");
                }
                other => other?,
            },
        }
        Ok(())
    }

    fn report(&self, outcome: &NodeOutcome) {
        match &outcome.failure {
            None => {
                self.metrics.inc_nodes_removed();
                self.events.record(ScalingEvent::NodeRemoved {
                    node: outcome.node.clone(),
                });
            }
            Some(failure) => {
                self.metrics.inc_node_removal_failures(failure.step.as_str());
                self.events.record(ScalingEvent::NodeRemovalFailed {
                    node: outcome.node.clone(),
                    state: outcome.state,
                    error: format!("{} failed: {}", failure.step, failure.error),
                });
            }
        }
    }
}
