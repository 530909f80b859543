//! Azure AD access tokens for the Resource Manager API
//!
//! Two sources are supported, tried in this order by [`default_credential`]:
//! - a service principal secret from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`
//!   and `AZURE_CLIENT_SECRET`
//! - the VM's managed identity through the instance metadata endpoint

use crate::error::ProviderError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Scope requested for Resource Manager calls
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Source of bearer tokens
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self) -> Result<String, ProviderError>;
}

/// Fixed token, for tests and pre-issued tokens
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenCredential for StaticToken {
    async fn token(&self) -> Result<String, ProviderError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Default)]
struct TokenCache {
    inner: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedToken, ProviderError>>,
    {
        let mut cached = self.inner.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.token.clone());
        }

        let fresh = fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Parse a token endpoint response. `expires_in` is a number from Azure AD
/// and a string from the metadata endpoint.
fn parse_token_response(body: &Value) -> Result<CachedToken, ProviderError> {
    let token = body
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Auth("token response has no access_token".to_string()))?;

    let expires_in = match body.get("expires_in") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .unwrap_or(3600);

    Ok(CachedToken {
        token: token.to_string(),
        expires_at: Instant::now() + Duration::from_secs(expires_in),
    })
}

/// Rejections of the credential itself are `Auth`; anything else the token
/// endpoint returns keeps its HTTP status.
async fn read_token(response: reqwest::Response) -> Result<CachedToken, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let description = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| {
                body.get("error_description")
                    .or_else(|| body.get("error"))
                    .map(Value::to_string)
            })
            .unwrap_or(text);
        let message = format!("token endpoint returned {}: {}", status, description);

        return Err(match status.as_u16() {
            400 | 401 | 403 => ProviderError::Auth(message),
            code => ProviderError::Api {
                status: code,
                message,
            },
        });
    }

    let body: Value = response.json().await?;
    parse_token_response(&body)
}

/// Service principal authenticated with a client secret
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cache: TokenCache,
}

impl ClientSecretCredential {
    pub fn new(
        http: reqwest::Client,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache: TokenCache::default(),
        }
    }

    /// Override the Azure AD host (sovereign clouds, tests)
    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into();
        self
    }

    async fn fetch(&self) -> Result<CachedToken, ProviderError> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        );
        debug!(client_id = %self.client_id, "Requesting token with client secret");

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", MANAGEMENT_SCOPE),
            ])
            .send()
            .await?;

        read_token(response).await
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn token(&self) -> Result<String, ProviderError> {
        self.cache.get_or_fetch(|| self.fetch()).await
    }
}

/// Managed identity of the VM the autoscaler runs on
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    endpoint: String,
    /// Client id of a user-assigned identity; system-assigned when `None`
    client_id: Option<String>,
    cache: TokenCache,
}

impl ManagedIdentityCredential {
    pub fn new(http: reqwest::Client, client_id: Option<String>) -> Self {
        Self {
            http,
            endpoint: DEFAULT_IMDS_ENDPOINT.to_string(),
            client_id,
            cache: TokenCache::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn fetch(&self) -> Result<CachedToken, ProviderError> {
        let mut query = vec![
            ("api-version", "2018-02-01"),
            ("resource", MANAGEMENT_RESOURCE),
        ];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&query)
            .header("Metadata", "true")
            .send()
            .await?;

        read_token(response).await
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn token(&self) -> Result<String, ProviderError> {
        self.cache.get_or_fetch(|| self.fetch()).await
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Pick a credential from the process environment
pub fn default_credential(http: reqwest::Client) -> Arc<dyn TokenCredential> {
    let tenant = non_empty_env("AZURE_TENANT_ID");
    let client = non_empty_env("AZURE_CLIENT_ID");
    let secret = non_empty_env("AZURE_CLIENT_SECRET");

    match (tenant, client, secret) {
        (Some(tenant), Some(client), Some(secret)) => {
            info!(client_id = %client, "Authenticating with client secret");
            let mut credential = ClientSecretCredential::new(http, tenant, client, secret);
            if let Some(host) = non_empty_env("AZURE_AUTHORITY_HOST") {
                credential = credential.with_authority_host(host);
            }
            Arc::new(credential)
        }
        (_, client, _) => {
            info!("Authenticating with managed identity");
            Arc::new(ManagedIdentityCredential::new(http, client))
        }
    }
}
