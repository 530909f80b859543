//! Safe removal of worker nodes
//!
//! Each node selected for removal goes through
//! `Running -> Cordoned -> Drained -> Deprovisioned -> Deleted`, one node at a
//! time. A failing step parks that node in the last state it reached and the
//! sequencer moves on to the next one; the next tick re-observes the cluster
//! and decides again.

mod selection;
mod sequencer;

#[cfg(test)]
mod tests;

pub use selection::{
    CacheOrder, LabeledFirst, NodeSelectionConfig, NodeSelector, OldestFirst, SelectionStrategy,
    DEFAULT_REMOVAL_LABEL,
};
pub use sequencer::NodeLifecycleSequencer;

use crate::error::{ClusterError, ProviderError};
use crate::models::NodeLifecycleState;
use std::fmt;
use thiserror::Error;

/// One step of a node removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStep {
    Cordon,
    Drain,
    Deprovision,
    Delete,
}

impl LifecycleStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStep::Cordon => "cordon",
            LifecycleStep::Drain => "drain",
            LifecycleStep::Deprovision => "deprovision",
            LifecycleStep::Delete => "delete",
        }
    }

    /// State a node reaches once this step succeeds
    pub fn reaches(&self) -> NodeLifecycleState {
        match self {
            LifecycleStep::Cordon => NodeLifecycleState::Cordoned,
            LifecycleStep::Drain => NodeLifecycleState::Drained,
            LifecycleStep::Deprovision => NodeLifecycleState::Deprovisioned,
            LifecycleStep::Delete => NodeLifecycleState::Deleted,
        }
    }
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug)]
pub struct NodeFailure {
    pub step: LifecycleStep,
    pub error: StepError,
}

/// Where one node's removal ended
#[derive(Debug)]
pub struct NodeOutcome {
    pub node: String,
    /// Last state successfully reached
    pub state: NodeLifecycleState,
    pub failure: Option<NodeFailure>,
}

impl NodeOutcome {
    pub fn is_removed(&self) -> bool {
        self.state == NodeLifecycleState::Deleted
    }
}

/// Result of one scale-down pass
#[derive(Debug, Default)]
pub struct ScaleDownReport {
    pub outcomes: Vec<NodeOutcome>,
}

impl ScaleDownReport {
    pub fn removed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_removed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.removed()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, node: &str) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.node == node)
    }
}
