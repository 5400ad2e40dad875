use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::ChatProvider;
use super::common::{delay_with_hint, exponential_backoff, merge_extras};
use super::streaming::{ChunkParser, ParsedChunk, spawn_sse_stream};
use super::types::{ChatRequest, EventStream, TokenUsage};
use crate::config::BackendConfig;
use crate::error::BenchError;
use crate::http_client::client_for_url;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const RESERVED_KEYS: &[&str] = &["model", "stream", "contents"];

/// Gemini `streamGenerateContent` 的 SSE 实现。system 提示词并入 user 轮次
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(config: &BackendConfig) -> Result<Self, BenchError> {
        let api_key = config.require_api_key("gemini")?.to_string();
        let base_url = config.base_url_or(DEFAULT_BASE_URL).to_string();
        let client = client_for_url(&base_url)
            .map_err(|e| BenchError::configuration("gemini.base_url", e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn body(request: &ChatRequest) -> Value {
        let mut generation = Map::new();
        if let Some(max_tokens) = request.max_tokens {
            generation.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(t) = request.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if let Some(p) = request.top_p {
            generation.insert("topP".into(), json!(p));
        }
        // no hidden thinking tokens skewing TTFT
        generation.insert("thinkingConfig".into(), json!({"thinkingBudget": 0}));

        let mut body = Map::new();
        body.insert(
            "contents".into(),
            json!([{"role": "user", "parts": [{"text": request.input_text()}]}]),
        );
        body.insert("generationConfig".into(), Value::Object(generation));
        merge_extras(&mut body, &request.extra, RESERVED_KEYS);
        Value::Object(body)
    }
}

#[derive(Debug, Default)]
struct GeminiChunkParser;

impl ChunkParser for GeminiChunkParser {
    fn parse(&mut self, _event: &str, data: &str) -> ParsedChunk {
        let Ok(v) = serde_json::from_str::<Value>(data) else {
            return ParsedChunk::default();
        };

        if let Some(err) = v.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return ParsedChunk::failed(message);
        }

        let delta: String = v
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();

        let usage = v.get("usageMetadata").map(|u| {
            let count = |key: &str| {
                u.get(key)
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(0)
            };
            TokenUsage {
                input: count("promptTokenCount"),
                output: count("candidatesTokenCount"),
            }
        });

        ParsedChunk {
            delta: Some(delta),
            usage,
            ..ParsedChunk::default()
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, BenchError> {
        self.validate_request(request)?;

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );
        let builder = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Accept", "text/event-stream")
            .json(&Self::body(request));

        spawn_sse_stream(self.name(), builder, GeminiChunkParser, cancel)
    }

    fn retry_markers(&self) -> &'static [&'static str] {
        &[
            "quota",
            "resource_exhausted",
            "connection",
            "network",
            "internal",
            "unavailable",
        ]
    }

    fn retry_delay(&self, attempt: u32, error: &BenchError) -> Duration {
        delay_with_hint(exponential_backoff(attempt), error)
    }
}
