//! Node Autoscaler
//!
//! Runs in the cluster it scales. Every tick it compares pod resource
//! requests against the worker pool and grows or shrinks the cloud scale
//! set behind it.

use anyhow::{Context, Result};
use autoscaler_lib::api::{self, AppState};
use autoscaler_lib::cluster::{KubeCluster, KubeDrainer};
use autoscaler_lib::health::HealthRegistry;
use autoscaler_lib::observability::{ScalerMetrics, StructuredLogger};
use autoscaler_lib::provider::create_provider;
use autoscaler_lib::ReconciliationControllerBuilder;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

/// Cluster node autoscaler
#[derive(Parser, Debug)]
#[command(name = "node-autoscaler")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "AUTOSCALER_CONFIG")]
    config: Option<PathBuf>,

    /// Evaluate and log decisions without changing the cluster or the cloud
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting node-autoscaler");

    let mut config = config::AutoscalerConfig::load(args.config.as_deref())?;
    if args.dry_run {
        config.dry_run = true;
    }
    info!(
        resource_group = %config.provider.azure.resource_group,
        scale_set = %config.provider.azure.scale_set,
        min_nodes = config.node_profile.min_nodes,
        max_nodes = config.node_profile.max_nodes,
        dry_run = config.dry_run,
        "Autoscaler configured"
    );

    let health = HealthRegistry::new();
    health.register_all().await;
    let metrics = ScalerMetrics::new();
    let logger = Arc::new(StructuredLogger::new(&config.provider.azure.scale_set));

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let cluster = Arc::new(KubeCluster::new(client.clone()));
    let drainer = Arc::new(KubeDrainer::new(client));
    let provider = create_provider(&config.provider).context("Failed to create cloud provider")?;

    let controller = ReconciliationControllerBuilder::new()
        .cluster(cluster)
        .drainer(drainer)
        .provider(provider)
        .selector(config.node_selection.build())
        .events(logger)
        .health(health.clone())
        .config(config.controller_config())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let app_state = Arc::new(AppState::new(health.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    let mut controller_handle = tokio::spawn(controller.run(shutdown_tx.subscribe()));
    health.set_ready(true).await;

    let result = tokio::select! {
        signal = shutdown_signal() => {
            let signal = signal.context("Failed to install signal handlers")?;
            info!(signal, "Shutdown signal received");
            // Receivers may already be gone if a task exited
            let _ = shutdown_tx.send(());
            controller_handle.await
        }
        result = &mut controller_handle => {
            let _ = shutdown_tx.send(());
            result
        }
    };

    health.set_ready(false).await;
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    match result.context("Controller task panicked")? {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, severity = e.severity().as_str(), "Autoscaler stopped");
            Err(e.into())
        }
    }
}

/// Resolves with the name of the first termination signal received
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sighup.recv() => "SIGHUP",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
