use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::ChatProvider;
use super::common::{disallows_sampling_parameters, merge_extras};
use super::openai::DEFAULT_BASE_URL;
use super::streaming::{ChunkParser, ParsedChunk, spawn_sse_stream};
use super::types::{ChatRequest, EventStream, TokenUsage};
use crate::config::BackendConfig;
use crate::error::BenchError;
use crate::http_client::client_for_url;

const RESERVED_KEYS: &[&str] = &["model", "stream", "input"];

/// OpenAI Responses API（`POST /responses`），按类型化 SSE 事件解析
pub struct OpenAIResponsesProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAIResponsesProvider {
    pub fn new(config: &BackendConfig) -> Result<Self, BenchError> {
        let api_key = config.require_api_key("openai_responses")?.to_string();
        let base_url = config.base_url_or(DEFAULT_BASE_URL).to_string();
        let client = client_for_url(&base_url)
            .map_err(|e| BenchError::configuration("openai_responses.base_url", e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn body(request: &ChatRequest) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert("input".into(), json!(request.input_text()));
        body.insert("stream".into(), json!(true));
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_output_tokens".into(), json!(max_tokens));
        }
        if !disallows_sampling_parameters(&request.model) {
            if let Some(t) = request.temperature {
                body.insert("temperature".into(), json!(t));
            }
            if let Some(p) = request.top_p {
                body.insert("top_p".into(), json!(p));
            }
        }
        merge_extras(&mut body, &request.extra, RESERVED_KEYS);
        Value::Object(body)
    }
}

fn usage_from_response(v: &Value) -> Option<TokenUsage> {
    let usage = v.pointer("/response/usage")?;
    Some(TokenUsage {
        input: u32::try_from(usage.get("input_tokens")?.as_u64()?).unwrap_or(u32::MAX),
        output: u32::try_from(usage.get("output_tokens")?.as_u64()?).unwrap_or(u32::MAX),
    })
}

fn error_message(v: &Value) -> Option<String> {
    ["/message", "/error/message", "/response/error/message"]
        .iter()
        .filter_map(|p| v.pointer(p).and_then(Value::as_str))
        .map(str::trim)
        .find(|m| !m.is_empty())
        .map(str::to_string)
}

/// Dispatches on the payload's `type`, which mirrors the SSE event name.
#[derive(Debug, Default)]
struct ResponsesEventParser;

impl ChunkParser for ResponsesEventParser {
    fn parse(&mut self, event: &str, data: &str) -> ParsedChunk {
        let Ok(v) = serde_json::from_str::<Value>(data) else {
            return ParsedChunk::default();
        };
        let kind = v.get("type").and_then(Value::as_str).unwrap_or(event);

        if kind.ends_with("output_text.delta") {
            let delta = v.get("delta").and_then(Value::as_str).unwrap_or_default();
            return ParsedChunk::text(delta);
        }
        match kind {
            "response.completed" => ParsedChunk::finished(usage_from_response(&v)),
            "response.failed" | "response.incomplete" => ParsedChunk::failed(
                error_message(&v).unwrap_or_else(|| format!("{kind} without details")),
            ),
            k if k.contains("error") => match error_message(&v) {
                Some(message) => ParsedChunk::failed(message),
                None => ParsedChunk::default(),
            },
            _ => ParsedChunk::default(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAIResponsesProvider {
    fn name(&self) -> &str {
        "openai_responses"
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, BenchError> {
        self.validate_request(request)?;

        let builder = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&Self::body(request));

        spawn_sse_stream(self.name(), builder, ResponsesEventParser, cancel)
    }
}
