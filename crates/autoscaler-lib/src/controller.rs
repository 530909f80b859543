//! Reconciliation controller
//!
//! Every tick observes pods and nodes, evaluates the scale policy and
//! dispatches the decision: a scale-up goes straight to the cloud provider,
//! a scale-down goes through the node lifecycle sequencer. Ticks never
//! overlap, and a shutdown signal is only honoured between ticks.

use crate::cluster::{ClusterClient, DrainPolicy, NodeDrainer};
use crate::error::{ScalerError, Severity};
use crate::health::{components, HealthRegistry};
use crate::lifecycle::{CacheOrder, NodeLifecycleSequencer, NodeSelector, ScaleDownReport};
use crate::models::{NodeProfile, NodeSnapshot, ScaleDecision, DEFAULT_CONTROL_PLANE_LABEL};
use crate::observability::{EventSink, ScalerMetrics, ScalingEvent, StructuredLogger};
use crate::provider::CloudProvider;
use crate::scaling::{evaluate, scale_up_headroom};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Settings for the reconciliation loop
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub profile: NodeProfile,
    /// Time between ticks (default: 3 minutes)
    pub tick_interval: Duration,
    /// Nodes carrying this label are not workers
    pub control_plane_label: String,
    pub drain_policy: DrainPolicy,
    /// Evaluate and report decisions without acting on them
    pub dry_run: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            profile: NodeProfile::default(),
            tick_interval: Duration::from_secs(180),
            control_plane_label: DEFAULT_CONTROL_PLANE_LABEL.to_string(),
            drain_policy: DrainPolicy::default(),
            dry_run: false,
        }
    }
}

/// What one successful tick did
#[derive(Debug)]
pub enum TickOutcome {
    NoChange,
    ScaledUp {
        requested: i64,
        added: i64,
    },
    /// Scale-up wanted but nothing could be added
    ScaleUpSkipped {
        requested: i64,
    },
    ScaledDown(ScaleDownReport),
    /// Dry run: the decision and the nodes a scale-down would remove
    DryRun {
        decision: ScaleDecision,
        planned_removals: Vec<String>,
    },
}

/// Periodic autoscaling loop for a single worker pool
pub struct ReconciliationController {
    cluster: Arc<dyn ClusterClient>,
    provider: Arc<dyn CloudProvider>,
    sequencer: NodeLifecycleSequencer,
    config: ControllerConfig,
    events: Arc<dyn EventSink>,
    health: HealthRegistry,
    metrics: ScalerMetrics,
}

impl ReconciliationController {
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run until `shutdown` fires or a tick fails fatally
    ///
    /// The first tick runs one interval after start. A transient tick error
    /// is reported and the loop carries on; a fatal one is returned.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ScalerError> {
        let period = self.config.tick_interval;
        self.events.record(ScalingEvent::ControllerStarted {
            tick_interval: period,
            dry_run: self.config.dry_run,
        });
        self.health.set_healthy(components::CONTROLLER).await;

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        self.events.record(ScalingEvent::ControllerStopped {
                            reason: e.to_string(),
                        });
                        return Err(e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reconciliation loop");
                    break;
                }
            }
        }

        self.events.record(ScalingEvent::ControllerStopped {
            reason: "shutdown requested".to_string(),
        });
        Ok(())
    }

    /// One tick with error classification. Only fatal errors are returned.
    pub async fn tick(&self) -> Result<(), ScalerError> {
        self.metrics.inc_ticks();
        let start = Instant::now();
        let result = self.reconcile().await;
        self.metrics.observe_tick_duration(start.elapsed());

        match result {
            Ok(outcome) => {
                debug!(outcome = ?outcome, "Tick complete");
                self.health.set_healthy(components::CONTROLLER).await;
                Ok(())
            }
            Err(e) => {
                let severity = e.severity();
                self.metrics.inc_tick_errors(severity);
                self.events.record(ScalingEvent::TickFailed {
                    severity,
                    error: e.to_string(),
                });

                let component = match e {
                    ScalerError::ListPods(_) | ScalerError::ListNodes(_) => components::CLUSTER_API,
                    ScalerError::ScaleUp { .. } => components::CLOUD_PROVIDER,
                };

                match severity {
                    Severity::Transient => {
                        self.health.set_degraded(component, e.to_string()).await;
                        self.health
                            .set_degraded(components::CONTROLLER, "last tick failed")
                            .await;
                        Ok(())
                    }
                    Severity::Fatal => {
                        self.health.set_unhealthy(component, e.to_string()).await;
                        self.health
                            .set_unhealthy(components::CONTROLLER, "stopped after fatal error")
                            .await;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Observe, decide and act once
    pub async fn reconcile(&self) -> Result<TickOutcome, ScalerError> {
        let pods = self
            .cluster
            .list_pods()
            .await
            .map_err(ScalerError::ListPods)?;
        let workers: Vec<NodeSnapshot> = self
            .cluster
            .list_nodes()
            .await
            .map_err(ScalerError::ListNodes)?
            .into_iter()
            .filter(|node| node.is_worker(&self.config.control_plane_label))
            .collect();
        self.health.set_healthy(components::CLUSTER_API).await;

        let evaluation = evaluate(&pods, workers.len(), &self.config.profile);
        self.metrics
            .record_evaluation(&evaluation, &self.config.profile);
        self.events.record(ScalingEvent::Decision(evaluation));

        match evaluation.decision {
            ScaleDecision::NoOp => Ok(TickOutcome::NoChange),
            ScaleDecision::ScaleUp { count } => self.scale_up(count, workers.len()).await,
            ScaleDecision::ScaleDown { target } => Ok(self.scale_down(&workers, target).await),
        }
    }

    async fn scale_up(&self, requested: i64, current_workers: usize) -> Result<TickOutcome, ScalerError> {
        let count = scale_up_headroom(requested, current_workers, &self.config.profile);

        if count <= 0 {
            let reason = if requested <= 0 {
                "unschedulable pods request no resources".to_string()
            } else {
                format!(
                    "pool already at max_nodes ({} workers, max {})",
                    current_workers, self.config.profile.max_nodes
                )
            };
            self.events
                .record(ScalingEvent::ScaleUpSkipped { requested, reason });
            return Ok(TickOutcome::ScaleUpSkipped { requested });
        }

        if self.config.dry_run {
            info!(requested, count, "Dry run: not scaling up");
            return Ok(TickOutcome::DryRun {
                decision: ScaleDecision::ScaleUp { count },
                planned_removals: Vec::new(),
            });
        }

        self.events
            .record(ScalingEvent::ScaleUpRequested { requested, count });
        self.provider
            .scale_up(count)
            .await
            .map_err(|source| ScalerError::ScaleUp { count, source })?;

        self.metrics.add_nodes_added(count);
        self.health.set_healthy(components::CLOUD_PROVIDER).await;
        info!(provider = self.provider.name(), count, "Scale-up complete");

        Ok(TickOutcome::ScaledUp {
            requested,
            added: count,
        })
    }

    async fn scale_down(&self, workers: &[NodeSnapshot], target: i32) -> TickOutcome {
        if self.config.dry_run {
            let planned_removals: Vec<String> = self
                .sequencer
                .plan(workers, target)
                .into_iter()
                .map(|node| node.name.clone())
                .collect();
            info!(target, nodes = ?planned_removals, "Dry run: not removing nodes");
            return TickOutcome::DryRun {
                decision: ScaleDecision::ScaleDown { target },
                planned_removals,
            };
        }

        let report = self.sequencer.scale_down(workers, target).await;
        if report.failed() > 0 {
            warn!(
                removed = report.removed(),
                failed = report.failed(),
                "Scale-down finished with failures"
            );
        } else if !report.is_empty() {
            info!(removed = report.removed(), "Scale-down complete");
        }
        TickOutcome::ScaledDown(report)
    }
}

/// Builder for the reconciliation controller
pub struct ReconciliationControllerBuilder {
    cluster: Option<Arc<dyn ClusterClient>>,
    drainer: Option<Arc<dyn NodeDrainer>>,
    provider: Option<Arc<dyn CloudProvider>>,
    selector: Arc<dyn NodeSelector>,
    events: Option<Arc<dyn EventSink>>,
    health: Option<HealthRegistry>,
    config: ControllerConfig,
}

impl ReconciliationControllerBuilder {
    pub fn new() -> Self {
        Self {
            cluster: None,
            drainer: None,
            provider: None,
            selector: Arc::new(CacheOrder),
            events: None,
            health: None,
            config: ControllerConfig::default(),
        }
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn drainer(mut self, drainer: Arc<dyn NodeDrainer>) -> Self {
        self.drainer = Some(drainer);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn CloudProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Node removal order (default: cluster list order)
    pub fn selector(mut self, selector: Arc<dyn NodeSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    pub fn build(self) -> Result<ReconciliationController> {
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("Cluster client is required"))?;
        let drainer = self
            .drainer
            .ok_or_else(|| anyhow::anyhow!("Node drainer is required"))?;
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("Cloud provider is required"))?;

        self.config.profile.validate()?;
        if self.config.tick_interval.is_zero() {
            anyhow::bail!("Tick interval must be greater than zero");
        }

        let events = self
            .events
            .unwrap_or_else(|| Arc::new(StructuredLogger::new(provider.name())));
        let sequencer = NodeLifecycleSequencer::new(
            cluster.clone(),
            drainer,
            provider.clone(),
            self.selector,
            self.config.drain_policy.clone(),
            events.clone(),
        );

        Ok(ReconciliationController {
            cluster,
            provider,
            sequencer,
            config: self.config,
            events,
            health: self.health.unwrap_or_default(),
            metrics: ScalerMetrics::new(),
        })
    }
}

impl Default for ReconciliationControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
