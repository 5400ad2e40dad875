use std::ops::RangeInclusive;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::ChatProvider;
use super::streaming::spawn_sse_stream;
use super::types::{ChatRequest, EventStream};
use crate::config::BackendConfig;
use crate::error::BenchError;
use crate::http_client::client_for_url;

mod request;
mod response;

pub use request::{AnthropicMessage, AnthropicRequest};
pub use response::AnthropicEventParser;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API 流式实现，system 提示词放在顶层 `system` 字段
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(config: &BackendConfig) -> Result<Self, BenchError> {
        let api_key = config.require_api_key("anthropic")?.to_string();
        let base_url = config.base_url_or(DEFAULT_BASE_URL).to_string();
        let client = client_for_url(&base_url)
            .map_err(|e| BenchError::configuration("anthropic.base_url", e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, BenchError> {
        self.validate_request(request)?;

        let url = format!("{}/v1/messages", self.base_url);
        let builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Accept", "text/event-stream")
            .json(&request::build_body(request));

        let parser = AnthropicEventParser::default();
        spawn_sse_stream(self.name(), builder, parser, cancel)
    }

    fn temperature_range(&self) -> RangeInclusive<f64> {
        0.0..=1.0
    }

    fn retry_markers(&self) -> &'static [&'static str] {
        &["overloaded", "api_error"]
    }
}
