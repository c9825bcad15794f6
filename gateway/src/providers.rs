//! Provider Adapter (C7): a uniform chat-completion client over whichever
//! upstream variant is configured. One adapter per upstream, one interface.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Transport-level failure talking to an upstream provider — distinguished
/// from an application-level error response (which still returns a status
/// code and body through the normal `chat_completion` return path).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to AI provider timed out")]
    Timeout,
    #[error("error connecting to AI provider: {0}")]
    Transport(String),
}

/// Capability every upstream variant implements: given a chat payload,
/// produce a response body and an HTTP status, verbatim from upstream.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn chat_completion(&self, payload: &Value) -> Result<(Value, u16), ProviderError>;
    fn provider_name(&self) -> &'static str;
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .expect("reqwest client configuration is valid")
}

fn classify_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(e.to_string())
    }
}

/// OpenAI-compatible provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: build_client(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    async fn chat_completion(&self, payload: &Value) -> Result<(Value, u16), ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status().as_u16();
        let body = response.json::<Value>().await.map_err(classify_error)?;
        Ok((body, status))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Azure OpenAI provider.
pub struct AzureOpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
}

impl AzureOpenAiProvider {
    pub fn new(endpoint: String, api_key: String, deployment: String, api_version: String) -> Self {
        Self {
            client: build_client(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            deployment,
            api_version,
        }
    }
}

#[async_trait]
impl ProviderAdapter for AzureOpenAiProvider {
    async fn chat_completion(&self, payload: &Value) -> Result<(Value, u16), ProviderError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        );
        let response = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status().as_u16();
        let body = response.json::<Value>().await.map_err(classify_error)?;
        Ok((body, status))
    }

    fn provider_name(&self) -> &'static str {
        "azure"
    }
}
