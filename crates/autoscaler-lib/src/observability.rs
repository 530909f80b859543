//! Observability infrastructure for the autoscaler
//!
//! Provides:
//! - Prometheus metrics (tick latency, pool size, decisions, node removals)
//! - The event sink the controller reports decisions and failures to
//! - A structured JSON logger implementing that sink

use crate::error::Severity;
use crate::models::{NodeLifecycleState, NodeProfile, ScaleDecision};
use crate::scaling::{scale_up_headroom, Evaluation};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for tick duration (in seconds). A tick that removes
/// nodes waits on drains and cloud operations, so the tail is long.
const TICK_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

struct ScalerMetricsInner {
    ticks: IntCounter,
    tick_errors: IntCounterVec,
    tick_duration_seconds: Histogram,
    worker_nodes: IntGauge,
    unschedulable_pods: IntGauge,
    required_nodes: IntGauge,
    target_nodes: IntGauge,
    nodes_added: IntCounter,
    nodes_removed: IntCounter,
    node_removal_failures: IntCounterVec,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            ticks: register_int_counter!(
                "node_autoscaler_ticks_total",
                "Reconciliation ticks started"
            )
            .expect("Failed to register ticks_total"),

            tick_errors: register_int_counter_vec!(
                "node_autoscaler_tick_errors_total",
                "Reconciliation ticks aborted by an error",
                &["severity"]
            )
            .expect("Failed to register tick_errors_total"),

            tick_duration_seconds: register_histogram!(
                "node_autoscaler_tick_duration_seconds",
                "Wall time of one reconciliation tick",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            worker_nodes: register_int_gauge!(
                "node_autoscaler_worker_nodes",
                "Worker nodes observed at the last tick"
            )
            .expect("Failed to register worker_nodes"),

            unschedulable_pods: register_int_gauge!(
                "node_autoscaler_unschedulable_pods",
                "Unschedulable pods observed at the last tick"
            )
            .expect("Failed to register unschedulable_pods"),

            required_nodes: register_int_gauge!(
                "node_autoscaler_required_nodes",
                "Node count required by demand before clamping"
            )
            .expect("Failed to register required_nodes"),

            target_nodes: register_int_gauge!(
                "node_autoscaler_target_nodes",
                "Worker count the last decision aimed for"
            )
            .expect("Failed to register target_nodes"),

            nodes_added: register_int_counter!(
                "node_autoscaler_nodes_added_total",
                "Nodes requested from the cloud provider"
            )
            .expect("Failed to register nodes_added_total"),

            nodes_removed: register_int_counter!(
                "node_autoscaler_nodes_removed_total",
                "Nodes fully removed from the pool"
            )
            .expect("Failed to register nodes_removed_total"),

            node_removal_failures: register_int_counter_vec!(
                "node_autoscaler_node_removal_failures_total",
                "Node removals abandoned, by the lifecycle step that failed",
                &["stage"]
            )
            .expect("Failed to register node_removal_failures_total"),
        }
    }
}

/// Autoscaler metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new)
    }

    pub fn inc_ticks(&self) {
        self.inner().ticks.inc();
    }

    pub fn observe_tick_duration(&self, duration: Duration) {
        self.inner()
            .tick_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn inc_tick_errors(&self, severity: Severity) {
        self.inner()
            .tick_errors
            .with_label_values(&[severity.as_str()])
            .inc();
    }

    /// Record what a policy evaluation saw and decided
    pub fn record_evaluation(&self, evaluation: &Evaluation, profile: &NodeProfile) {
        let inner = self.inner();
        inner.worker_nodes.set(evaluation.current_workers as i64);
        inner
            .unschedulable_pods
            .set(evaluation.unschedulable_pods as i64);
        inner.required_nodes.set(evaluation.required);
        inner.target_nodes.set(target_workers(evaluation, profile));
    }

    pub fn add_nodes_added(&self, count: i64) {
        if let Ok(count) = u64::try_from(count) {
            self.inner().nodes_added.inc_by(count);
        }
    }

    pub fn inc_nodes_removed(&self) {
        self.inner().nodes_removed.inc();
    }

    /// `stage` is the step that failed, not the state the node was left in
    pub fn inc_node_removal_failures(&self, stage: &str) {
        self.inner()
            .node_removal_failures
            .with_label_values(&[stage])
            .inc();
    }
}

/// Worker count the controller acts towards. Scale-ups are capped at the
/// headroom left below `max_nodes`.
fn target_workers(evaluation: &Evaluation, profile: &NodeProfile) -> i64 {
    let current = evaluation.current_workers as i64;
    match evaluation.decision {
        ScaleDecision::ScaleUp { count } => {
            current + scale_up_headroom(count, evaluation.current_workers, profile).max(0)
        }
        ScaleDecision::ScaleDown { target } => i64::from(target),
        ScaleDecision::NoOp => current,
    }
}

/// Notable things the controller did or failed to do
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingEvent {
    ControllerStarted {
        tick_interval: Duration,
        dry_run: bool,
    },
    ControllerStopped {
        reason: String,
    },
    Decision(Evaluation),
    ScaleUpRequested {
        /// Count the policy asked for
        requested: i64,
        /// Count sent to the provider after the headroom cap
        count: i64,
    },
    ScaleUpSkipped {
        requested: i64,
        reason: String,
    },
    NodeRemoved {
        node: String,
    },
    NodeRemovalFailed {
        node: String,
        /// Last state the node reached
        state: NodeLifecycleState,
        error: String,
    },
    TickFailed {
        severity: Severity,
        error: String,
    },
}

/// Fire-and-forget receiver of scaling events
pub trait EventSink: Send + Sync {
    fn record(&self, event: ScalingEvent);
}

/// Structured logger for autoscaler events
///
/// Emits one JSON log line per event with an `event` field, tagged with the
/// pool the autoscaler manages.
#[derive(Clone)]
pub struct StructuredLogger {
    pool: String,
}

impl StructuredLogger {
    pub fn new(pool: impl Into<String>) -> Self {
        Self { pool: pool.into() }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    fn log_decision(&self, evaluation: &Evaluation) {
        info!(
            event = "scale_decision",
            pool = %self.pool,
            decision = %evaluation.decision,
            demand_cpu_cores = evaluation.demand.cpu,
            demand_memory_bytes = evaluation.demand.memory,
            required_nodes = evaluation.required,
            unschedulable_pods = evaluation.unschedulable_pods,
            worker_nodes = evaluation.current_workers,
            "Evaluated scaling decision"
        );
    }

    fn log_tick_failed(&self, severity: Severity, error: &str) {
        match severity {
            Severity::Fatal => {
                error!(
                    event = "tick_failed",
                    pool = %self.pool,
                    severity = severity.as_str(),
                    error = %error,
                    "Reconciliation failed, stopping"
                );
            }
            Severity::Transient => {
                warn!(
                    event = "tick_failed",
                    pool = %self.pool,
                    severity = severity.as_str(),
                    error = %error,
                    "Reconciliation failed, retrying next tick"
                );
            }
        }
    }
}

impl EventSink for StructuredLogger {
    fn record(&self, event: ScalingEvent) {
        match event {
            ScalingEvent::ControllerStarted {
                tick_interval,
                dry_run,
            } => {
                info!(
                    event = "controller_started",
                    pool = %self.pool,
                    tick_interval_secs = tick_interval.as_secs(),
                    dry_run,
                    "Reconciliation controller started"
                );
            }
            ScalingEvent::ControllerStopped { reason } => {
                info!(
                    event = "controller_stopped",
                    pool = %self.pool,
                    reason = %reason,
                    "Reconciliation controller stopped"
                );
            }
            ScalingEvent::Decision(evaluation) => self.log_decision(&evaluation),
            ScalingEvent::ScaleUpRequested { requested, count } => {
                info!(
                    event = "scale_up_requested",
                    pool = %self.pool,
                    requested,
                    count,
                    "Requesting additional nodes"
                );
            }
            ScalingEvent::ScaleUpSkipped { requested, reason } => {
                info!(
                    event = "scale_up_skipped",
                    pool = %self.pool,
                    requested,
                    reason = %reason,
                    "Scale-up skipped"
                );
            }
            ScalingEvent::NodeRemoved { node } => {
                info!(
                    event = "node_removed",
                    pool = %self.pool,
                    node = %node,
                    "Node removed from pool"
                );
            }
            ScalingEvent::NodeRemovalFailed { node, state, error } => {
                warn!(
                    event = "node_removal_failed",
                    pool = %self.pool,
                    node = %node,
                    state = state.as_str(),
                    error = %error,
                    "Node removal abandoned"
                );
            }
            ScalingEvent::TickFailed { severity, error } => self.log_tick_failed(severity, &error),
        }
    }
}
