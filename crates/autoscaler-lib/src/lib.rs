//! Node autoscaler library
//!
//! This crate provides the core functionality for:
//! - Capacity estimation from aggregate pod resource requests
//! - Scale-up / scale-down decisions for a single homogeneous worker pool
//! - Safe node removal (cordon, drain, deprovision, delete)
//! - Cloud provider backends
//! - The periodic reconciliation loop
//! - Health checks and observability

pub mod api;
pub mod cluster;
pub mod controller;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod provider;
pub mod scaling;

#[cfg(test)]
mod fakes;

pub use controller::{ControllerConfig, ReconciliationController, ReconciliationControllerBuilder};
pub use error::{ClusterError, ProfileError, ProviderError, ScalerError, Severity};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EventSink, ScalerMetrics, ScalingEvent, StructuredLogger};
