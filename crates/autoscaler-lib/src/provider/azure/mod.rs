//! Azure backend: a flexible-orchestration virtual machine scale set
//!
//! Scale-up raises the scale set's SKU capacity. Scale-down finds the VM
//! whose OS hostname matches the node name inside the resource group and
//! force-deletes it.

pub mod credential;
mod operation;


pub use self::credential::{
    default_credential, ClientSecretCredential, ManagedIdentityCredential, StaticToken,
    TokenCredential,
};

use self::operation::{api_error, OperationPoller};
use super::CloudProvider;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Scale set location and API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    #[serde(default = "default_subscription_id")]
    pub subscription_id: String,
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub scale_set: String,
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Delay between polls of a long-running operation
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Upper bound for any single long-running operation
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_subscription_id() -> String {
    std::env::var("AZURE_SUBSCRIPTION_ID").unwrap_or_default()
}

fn default_management_endpoint() -> String {
    "https://management.azure.com".to_string()
}

fn default_api_version() -> String {
    "2023-09-01".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_operation_timeout_secs() -> u64 {
    900
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            subscription_id: default_subscription_id(),
            resource_group: String::new(),
            scale_set: String::new(),
            management_endpoint: default_management_endpoint(),
            api_version: default_api_version(),
            poll_interval_secs: default_poll_interval_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl AzureConfig {
    pub fn validate(&self) -> Result<(), ProviderError> {
        let required = [
            ("subscription_id", &self.subscription_id),
            ("resource_group", &self.resource_group),
            ("scale_set", &self.scale_set),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ProviderError::Config(format!("azure.{} must be set", field)));
            }
        }
        Url::parse(&self.management_endpoint).map_err(|e| {
            ProviderError::Config(format!(
                "invalid management endpoint {}: {}",
                self.management_endpoint, e
            ))
        })?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// Subset of the scale set resource the provider reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sku {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tier: Option<String>,
    #[serde(default)]
    capacity: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ScaleSet {
    sku: Sku,
}

#[derive(Debug, Serialize)]
struct ScaleSetUpdate {
    sku: Sku,
}

/// Azure virtual machine scale set provider
pub struct AzureProvider {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    config: AzureConfig,
    poller: OperationPoller,
}

impl AzureProvider {
    pub fn new(
        config: AzureConfig,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, ProviderError> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let poller = OperationPoller::new(
            http.clone(),
            credential.clone(),
            config.poll_interval(),
            config.operation_timeout(),
        );

        Ok(Self {
            http,
            credential,
            config,
            poller,
        })
    }

    /// Authenticate with whatever the process environment provides
    pub fn from_environment(config: AzureConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Self::new(config, default_credential(http))
    }

    pub fn config(&self) -> &AzureConfig {
        &self.config
    }

    fn resource_url(&self, path: &str) -> Result<Url, ProviderError> {
        let raw = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/{}",
            self.config.management_endpoint.trim_end_matches('/'),
            self.config.subscription_id,
            self.config.resource_group,
            path
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| ProviderError::Config(format!("invalid resource url {}: {}", raw, e)))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }

    fn scale_set_url(&self) -> Result<Url, ProviderError> {
        self.resource_url(&format!("virtualMachineScaleSets/{}", self.config.scale_set))
    }

    async fn get_json(&self, url: Url) -> Result<Value, ProviderError> {
        let token = self.credential.token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn current_sku(&self) -> Result<Sku, ProviderError> {
        let body = self.get_json(self.scale_set_url()?).await?;
        let scale_set: ScaleSet = serde_json::from_value(body).map_err(|e| ProviderError::Api {
            status: 200,
            message: format!("unexpected scale set document: {}", e),
        })?;
        Ok(scale_set.sku)
    }

    /// Name of the VM whose hostname matches `node_name`
    async fn find_instance(&self, node_name: &str) -> Result<Option<String>, ProviderError> {
        let mut next = Some(self.resource_url("virtualMachines")?);

        while let Some(url) = next.take() {
            let page = self.get_json(url).await?;

            let instances = page
                .get("value")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for vm in instances {
                let hostname = vm
                    .pointer("/properties/osProfile/computerName")
                    .and_then(Value::as_str);
                if hostname.is_some_and(|h| h.eq_ignore_ascii_case(node_name)) {
                    if let Some(name) = vm.get("name").and_then(Value::as_str) {
                        return Ok(Some(name.to_string()));
                    }
                }
            }

            next = page
                .get("nextLink")
                .and_then(Value::as_str)
                .filter(|link| !link.is_empty())
                .map(|link| {
                    Url::parse(link).map_err(|e| ProviderError::Api {
                        status: 200,
                        message: format!("invalid nextLink {}: {}", link, e),
                    })
                })
                .transpose()?;
        }

        Ok(None)
    }
}

#[async_trait]
impl CloudProvider for AzureProvider {
    fn name(&self) -> &str {
        "azure"
    }

    async fn scale_up(&self, count: i64) -> Result<(), ProviderError> {
        if count <= 0 {
            return Ok(());
        }

        let mut sku = self.current_sku().await?;
        let current = sku.capacity.unwrap_or(0);
        sku.capacity = Some(current + count);
        info!(
            scale_set = %self.config.scale_set,
            from = current,
            to = current + count,
            "Updating scale set capacity"
        );

        let token = self.credential.token().await?;
        let response = self
            .http
            .patch(self.scale_set_url()?)
            .bearer_auth(token)
            .json(&ScaleSetUpdate { sku })
            .send()
            .await?;

        self.poller.wait(response).await?;
        info!(scale_set = %self.config.scale_set, capacity = current + count, "Scale set capacity updated");
        Ok(())
    }

    async fn scale_down(&self, node_name: &str) -> Result<(), ProviderError> {
        let vm_name = self
            .find_instance(node_name)
            .await?
            .ok_or_else(|| ProviderError::InstanceNotFound(node_name.to_string()))?;
        debug!(node = %node_name, vm = %vm_name, "Resolved node to virtual machine");

        let mut url = self.resource_url(&format!("virtualMachines/{}", vm_name))?;
        url.query_pairs_mut().append_pair("forceDeletion", "true");

        let token = self.credential.token().await?;
        let response = self.http.delete(url).bearer_auth(token).send().await?;

        self.poller.wait(response).await?;
        info!(node = %node_name, vm = %vm_name, "Deleted virtual machine");
        Ok(())
    }
}
