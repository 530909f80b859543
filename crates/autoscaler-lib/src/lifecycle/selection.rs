//! Choice of which worker nodes a scale-down removes

use crate::models::NodeSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_REMOVAL_LABEL: &str = "autoscaler/removable";

/// Ranks worker nodes for removal
pub trait NodeSelector: Send + Sync {
    fn name(&self) -> &str;

    /// Pick up to `count` nodes, first to be removed first
    fn select<'a>(&self, workers: &'a [NodeSnapshot], count: usize) -> Vec<&'a NodeSnapshot>;
}

/// Nodes in the order the cluster listed them
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOrder;

impl NodeSelector for CacheOrder {
    fn name(&self) -> &str {
        "cache-order"
    }

    fn select<'a>(&self, workers: &'a [NodeSnapshot], count: usize) -> Vec<&'a NodeSnapshot> {
        workers.iter().take(count).collect()
    }
}

/// Oldest nodes first, ties broken by name. Nodes without a creation
/// timestamp go last.
#[derive(Debug, Clone, Copy, Default)]
pub struct OldestFirst;

impl NodeSelector for OldestFirst {
    fn name(&self) -> &str {
        "oldest-first"
    }

    fn select<'a>(&self, workers: &'a [NodeSnapshot], count: usize) -> Vec<&'a NodeSnapshot> {
        let mut ranked: Vec<&NodeSnapshot> = workers.iter().collect();
        ranked.sort_by(|a, b| {
            a.created_at
                .is_none()
                .cmp(&b.created_at.is_none())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.name.cmp(&b.name))
        });
        ranked.truncate(count);
        ranked
    }
}

/// Nodes an operator labeled as removable first, then list order
#[derive(Debug, Clone)]
pub struct LabeledFirst {
    label: String,
}

impl LabeledFirst {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl NodeSelector for LabeledFirst {
    fn name(&self) -> &str {
        "labeled-first"
    }

    fn select<'a>(&self, workers: &'a [NodeSnapshot], count: usize) -> Vec<&'a NodeSnapshot> {
        let (labeled, rest): (Vec<&NodeSnapshot>, Vec<&NodeSnapshot>) = workers
            .iter()
            .partition(|node| node.labels.contains_key(&self.label));

        labeled.into_iter().chain(rest).take(count).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    #[default]
    CacheOrder,
    OldestFirst,
    LabeledFirst,
}

/// Node selection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSelectionConfig {
    #[serde(default)]
    pub strategy: SelectionStrategy,
    /// Label marking preferred nodes for `labeled-first`
    #[serde(default = "default_removal_label")]
    pub removal_label: String,
}

fn default_removal_label() -> String {
    DEFAULT_REMOVAL_LABEL.to_string()
}

impl Default for NodeSelectionConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            removal_label: default_removal_label(),
        }
    }
}

impl NodeSelectionConfig {
    pub fn build(&self) -> Arc<dyn NodeSelector> {
        match self.strategy {
            SelectionStrategy::CacheOrder => Arc::new(CacheOrder),
            SelectionStrategy::OldestFirst => Arc::new(OldestFirst),
            SelectionStrategy::LabeledFirst => Arc::new(LabeledFirst::new(&self.removal_label)),
        }
    }
}
