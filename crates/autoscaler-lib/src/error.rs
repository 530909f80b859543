//! Error types for the autoscaler
//!
//! Errors that abort a tick carry a [`Severity`]. Fatal errors (bad
//! credentials, missing permissions, misconfigured cloud resources) stop the
//! reconciliation loop; transient ones skip the tick and the next interval
//! retries from a fresh observation.

use std::time::Duration;
use thiserror::Error;

/// How the controller reacts to a failed tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Retrying cannot help; stop the loop
    Fatal,
    /// Skip this tick and retry at the next interval
    Transient,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::Transient => "transient",
        }
    }

    fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => Severity::Fatal,
            _ => Severity::Transient,
        }
    }
}

/// Invalid node profile configuration
#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("cpu capacity per node must be a positive number, got {0}")]
    InvalidCpuCapacity(f64),

    #[error("memory capacity per node must be positive, got {0}")]
    InvalidMemoryCapacity(i64),

    #[error("node bounds must not be negative (min={min}, max={max})")]
    NegativeBounds { min: i64, max: i64 },

    #[error("min nodes ({min}) exceeds max nodes ({max})")]
    InvertedBounds { min: i64, max: i64 },
}

/// Failure talking to the cluster API or draining a node
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("cannot drain node {node}: {reason}")]
    DrainBlocked { node: String, reason: String },

    #[error("drain of node {node} did not finish within {timeout:?}")]
    DrainTimeout { node: String, timeout: Duration },
}

impl ClusterError {
    pub fn severity(&self) -> Severity {
        match self {
            ClusterError::Kube(kube::Error::Api(response)) => {
                Severity::from_http_status(response.code)
            }
            ClusterError::Kube(kube::Error::Auth(_)) => Severity::Fatal,
            ClusterError::Kube(kube::Error::InferConfig(_)) => Severity::Fatal,
            _ => Severity::Transient,
        }
    }

    /// True when the API reported that the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::Kube(kube::Error::Api(response)) if response.code == 404)
    }
}

/// Failure reported by a cloud provider backend
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no cloud instance found for node {0}")]
    InstanceNotFound(String),

    #[error("failed to obtain cloud credentials: {0}")]
    Auth(String),

    #[error("cloud api request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cloud api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("cloud operation failed with status {status}: {message}")]
    OperationFailed { status: String, message: String },

    #[error("cloud operation did not complete within {0:?}")]
    OperationTimeout(Duration),

    #[error("invalid provider configuration: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn severity(&self) -> Severity {
        match self {
            ProviderError::Auth(_) | ProviderError::Config(_) => Severity::Fatal,
            // The scale set or resource group does not exist
            ProviderError::Api { status: 404, .. } => Severity::Fatal,
            ProviderError::Api { status, .. } => Severity::from_http_status(*status),
            _ => Severity::Transient,
        }
    }
}

/// Failure that aborts a whole reconciliation tick
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("failed to list pods: {0}")]
    ListPods(#[source] ClusterError),

    #[error("failed to list nodes: {0}")]
    ListNodes(#[source] ClusterError),

    #[error("failed to scale up by {count} nodes: {source}")]
    ScaleUp {
        count: i64,
        #[source]
        source: ProviderError,
    },
}

impl ScalerError {
    pub fn severity(&self) -> Severity {
        match self {
            ScalerError::ListPods(e) | ScalerError::ListNodes(e) => e.severity(),
            ScalerError::ScaleUp { source, .. } => source.severity(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
