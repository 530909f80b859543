//! Long-running Resource Manager operations
//!
//! A mutating call answers either with the final result or with a pointer
//! to poll: an `Azure-AsyncOperation` URL returning a status document, or a
//! `Location` URL answering 202 until the work is done.

use super::credential::TokenCredential;
use crate::error::ProviderError;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";

/// Turn an unsuccessful response into a [`ProviderError::Api`]
pub(crate) async fn api_error(response: Response) -> ProviderError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| {
            let error = body.get("error")?;
            let code = error.get("code").and_then(Value::as_str).unwrap_or("Unknown");
            let message = error.get("message").and_then(Value::as_str).unwrap_or("");
            Some(format!("{}: {}", code, message))
        })
        .unwrap_or(text);

    ProviderError::Api { status, message }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Polls an operation until it reaches a terminal state
pub(crate) struct OperationPoller {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    poll_interval: Duration,
    timeout: Duration,
}

impl OperationPoller {
    pub(crate) fn new(
        http: reqwest::Client,
        credential: Arc<dyn TokenCredential>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            credential,
            poll_interval,
            timeout,
        }
    }

    /// Wait for the operation started by `response` to finish
    pub(crate) async fn wait(&self, response: Response) -> Result<(), ProviderError> {
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let headers = response.headers();
        let async_operation = headers
            .get(ASYNC_OPERATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let location = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let delay = retry_after(headers).unwrap_or(self.poll_interval);

        let polling = async {
            if let Some(url) = async_operation {
                self.poll_async_operation(&url, delay).await
            } else if let (StatusCode::ACCEPTED, Some(url)) = (status, location) {
                self.poll_location(&url, delay).await
            } else {
                Ok(())
            }
        };

        tokio::time::timeout(self.timeout, polling)
            .await
            .map_err(|_| ProviderError::OperationTimeout(self.timeout))?
    }

    async fn get(&self, url: &str) -> Result<Response, ProviderError> {
        let token = self.credential.token().await?;
        Ok(self.http.get(url).bearer_auth(token).send().await?)
    }

    async fn poll_async_operation(&self, url: &str, first_delay: Duration) -> Result<(), ProviderError> {
        let mut delay = first_delay;
        loop {
            tokio::time::sleep(delay).await;

            let response = self.get(url).await?;
            if !response.status().is_success() {
                return Err(api_error(response).await);
            }
            delay = retry_after(response.headers()).unwrap_or(self.poll_interval);

            let body: Value = response.json().await?;
            let status = body
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("InProgress");
            debug!(status, "Polled cloud operation");

            match status {
                "Succeeded" => return Ok(()),
                "Failed" | "Canceled" | "Cancelled" => {
                    let message = body
                        .get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or("no error details")
                        .to_string();
                    return Err(ProviderError::OperationFailed {
                        status: status.to_string(),
                        message,
                    });
                }
                _ => continue,
            }
        }
    }

    async fn poll_location(&self, url: &str, first_delay: Duration) -> Result<(), ProviderError> {
        let mut delay = first_delay;
        loop {
            tokio::time::sleep(delay).await;

            let response = self.get(url).await?;
            match response.status() {
                StatusCode::ACCEPTED => {
                    delay = retry_after(response.headers()).unwrap_or(self.poll_interval);
                }
                status if status.is_success() => return Ok(()),
                _ => return Err(api_error(response).await),
            }
        }
    }
}
