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

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Groq 的 OpenAI 兼容接口。usage 位于最后一个 chunk 的 `x_groq.usage`；
/// `reasoning_effort` 与 `stop` 作为 extras 透传
pub struct GroqProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GroqProvider {
    pub fn new(config: &BackendConfig) -> Result<Self, BenchError> {
        let api_key = config.require_api_key("groq")?.to_string();
        let base_url = config.base_url_or(DEFAULT_BASE_URL).to_string();
        let client = client_for_url(&base_url)
            .map_err(|e| BenchError::configuration("groq.base_url", e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn body(request: &ChatRequest) -> Value {
        chat_completions_body(
            request,
            ChatBodyOptions {
                include_model: true,
                include_usage: false,
                max_tokens_field: "max_completion_tokens",
            },
        )
    }
}

#[async_trait]
impl ChatProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, BenchError> {
        self.validate_request(request)?;

        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&Self::body(request));

        spawn_sse_stream(self.name(), builder, ChatChunkParser, cancel)
    }

    fn retry_markers(&self) -> &'static [&'static str] {
        &["over capacity", "service unavailable"]
    }
}
