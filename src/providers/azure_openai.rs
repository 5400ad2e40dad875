use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::ChatProvider;
use super::openai::{ChatBodyOptions, ChatChunkParser, chat_completions_body};
use super::streaming::spawn_sse_stream;
use super::types::{ChatRequest, EventStream};
use crate::config::BackendConfig;
use crate::error::BenchError;
use crate::http_client::client_for_url;

pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Azure OpenAI 部署。`models.yaml` 中的模型名即部署名
pub struct AzureOpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    api_version: String,
}

impl AzureOpenAIProvider {
    pub fn new(config: &BackendConfig) -> Result<Self, BenchError> {
        let api_key = config.require_api_key("azure_openai")?.to_string();
        let endpoint = config
            .base_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                BenchError::configuration("azure_openai.endpoint", "endpoint is not configured")
            })?
            .to_string();
        if reqwest::Url::parse(&endpoint).is_err() {
            return Err(BenchError::configuration(
                "azure_openai.endpoint",
                format!("invalid endpoint URL `{endpoint}`"),
            ));
        }
        let api_version = config
            .api_version
            .clone()
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());
        let client = client_for_url(&endpoint)
            .map_err(|e| BenchError::configuration("azure_openai.endpoint", e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            endpoint,
            api_version,
        })
    }

    fn url(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, deployment, self.api_version
        )
    }

    fn body(request: &ChatRequest) -> Value {
        chat_completions_body(
            request,
            ChatBodyOptions {
                include_model: false,
                include_usage: false,
                max_tokens_field: "max_tokens",
            },
        )
    }
}

#[async_trait]
impl ChatProvider for AzureOpenAIProvider {
    fn name(&self) -> &str {
        "azure_openai"
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, BenchError> {
        self.validate_request(request)?;

        let builder = self
            .client
            .post(self.url(&request.model))
            .header("api-key", &self.api_key)
            .header("Accept", "text/event-stream")
            .json(&Self::body(request));

        spawn_sse_stream(self.name(), builder, ChatChunkParser, cancel)
    }

    fn retry_markers(&self) -> &'static [&'static str] {
        &[
            "ServiceUnavailable",
            "InternalServerError",
            "BadGateway",
            "GatewayTimeout",
        ]
    }
}
