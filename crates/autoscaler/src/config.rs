//! Autoscaler configuration
//!
//! Layers, lowest priority first: built-in defaults, an optional config file
//! (format taken from its extension), then `AUTOSCALER__*` environment
//! variables with `__` between nested keys, e.g.
//! `AUTOSCALER__NODE_PROFILE__MAX_NODES=5`.

use anyhow::{Context, Result};
use autoscaler_lib::cluster::DrainPolicy;
use autoscaler_lib::lifecycle::NodeSelectionConfig;
use autoscaler_lib::provider::ProviderConfig;
use autoscaler_lib::{ControllerConfig, NodeProfile, DEFAULT_CONTROL_PLANE_LABEL};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "AUTOSCALER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    #[serde(default)]
    pub node_profile: NodeProfile,

    /// Seconds between reconciliation ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_control_plane_label")]
    pub control_plane_label: String,

    #[serde(default)]
    pub drain: DrainConfig,

    #[serde(default)]
    pub node_selection: NodeSelectionConfig,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Drain settings as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_drain_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_true")]
    pub ignore_daemon_sets: bool,
    #[serde(default = "default_true")]
    pub delete_empty_dir_data: bool,
    #[serde(default = "default_drain_secs")]
    pub timeout_secs: u64,
}

fn default_tick_interval() -> u64 {
    180
}

fn default_control_plane_label() -> String {
    DEFAULT_CONTROL_PLANE_LABEL.to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_drain_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            force: false,
            grace_period_secs: default_drain_secs(),
            ignore_daemon_sets: true,
            delete_empty_dir_data: true,
            timeout_secs: default_drain_secs(),
        }
    }
}

impl DrainConfig {
    pub fn policy(&self) -> DrainPolicy {
        DrainPolicy {
            force: self.force,
            grace_period: Duration::from_secs(self.grace_period_secs),
            ignore_daemon_sets: self.ignore_daemon_sets,
            delete_empty_dir_data: self.delete_empty_dir_data,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            node_profile: NodeProfile::default(),
            tick_interval_secs: default_tick_interval(),
            control_plane_label: default_control_plane_label(),
            drain: DrainConfig::default(),
            node_selection: NodeSelectionConfig::default(),
            api_port: default_api_port(),
            dry_run: false,
            provider: ProviderConfig::default(),
        }
    }
}

impl AutoscalerConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(
            path,
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: AutoscalerConfig = builder
            .add_source(env)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.node_profile
            .validate()
            .context("Invalid node_profile")?;

        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be greater than zero");
        }
        if self.control_plane_label.trim().is_empty() {
            anyhow::bail!("control_plane_label must not be empty");
        }

        self.provider.validate().context("Invalid provider")?;
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            profile: self.node_profile.clone(),
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            control_plane_label: self.control_plane_label.clone(),
            drain_policy: self.drain.policy(),
            dry_run: self.dry_run,
        }
    }
}
