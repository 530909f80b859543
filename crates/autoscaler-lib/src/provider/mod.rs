//! Cloud provider backends
//!
//! A provider adds capacity to the worker pool and terminates the instance
//! behind a given node. Both calls return only once the cloud-side
//! operation has finished or failed.

pub mod azure;

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use async_trait::async_trait;
pub use azure::{AzureConfig, AzureProvider};

/// Capability the autoscaler needs from the cloud
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Grow the instance group's desired capacity by `count`
    async fn scale_up(&self, count: i64) -> Result<(), ProviderError>;

    /// Force-delete the instance whose hostname matches `node_name`
    async fn scale_down(&self, node_name: &str) -> Result<(), ProviderError>;
}

/// Supported provider backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Azure,
}

/// Provider selection plus per-backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub azure: AzureConfig,
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ProviderError> {
        match self.kind {
            ProviderKind::Azure => self.azure.validate(),
        }
    }
}

/// Create the configured provider backend
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn CloudProvider>, ProviderError> {
    config.validate()?;

    match config.kind {
        ProviderKind::Azure => {
            tracing::info!(
                resource_group = %config.azure.resource_group,
                scale_set = %config.azure.scale_set,
                "Using Azure scale set provider"
            );
            Ok(Arc::new(AzureProvider::from_environment(config.azure.clone())?))
        }
    }
}
