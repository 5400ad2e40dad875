use async_openai::types::CreateChatCompletionStreamResponse;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::ChatProvider;
use super::common::{disallows_sampling_parameters, merge_extras};
use super::streaming::{ChunkParser, ParsedChunk, spawn_sse_stream};
use super::types::{ChatRequest, EventStream, TokenUsage};
use crate::config::BackendConfig;
use crate::error::BenchError;
use crate::http_client::client_for_url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const RESERVED_KEYS: &[&str] = &["model", "stream", "messages"];

/// Knobs that differ between OpenAI-compatible chat completion endpoints.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChatBodyOptions {
    pub include_model: bool,
    pub include_usage: bool,
    pub max_tokens_field: &'static str,
}

pub(crate) fn chat_messages(request: &ChatRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system() {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": request.user_prompt}));
    messages
}

pub(crate) fn chat_completions_body(request: &ChatRequest, opts: ChatBodyOptions) -> Value {
    let mut body = Map::new();
    if opts.include_model {
        body.insert("model".into(), json!(request.model));
    }
    body.insert("messages".into(), Value::Array(chat_messages(request)));
    body.insert("stream".into(), json!(true));
    if opts.include_usage {
        body.insert("stream_options".into(), json!({"include_usage": true}));
    }
    if let Some(max_tokens) = request.max_tokens {
        body.insert(opts.max_tokens_field.into(), json!(max_tokens));
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

fn usage_from_value(v: &Value) -> Option<TokenUsage> {
    let input = v.get("prompt_tokens")?.as_u64()?;
    let output = v.get("completion_tokens")?.as_u64()?;
    Some(TokenUsage {
        input: u32::try_from(input).unwrap_or(u32::MAX),
        output: u32::try_from(output).unwrap_or(u32::MAX),
    })
}

/// Parses `chat.completion.chunk` payloads. Typed first, then a loose `Value` walk for
/// vendors whose chunks drift from the official schema (Azure filter chunks, `x_groq`).
#[derive(Debug, Default)]
pub(crate) struct ChatChunkParser;

impl ChunkParser for ChatChunkParser {
    fn parse(&mut self, _event: &str, data: &str) -> ParsedChunk {
        if let Ok(chunk) = serde_json::from_str::<CreateChatCompletionStreamResponse>(data) {
            let delta: String = chunk
                .choices
                .iter()
                .filter_map(|c| c.delta.content.as_deref())
                .collect();
            let usage = chunk.usage.map(|u| TokenUsage {
                input: u.prompt_tokens,
                output: u.completion_tokens,
            });
            if usage.is_some() || !data.contains("x_groq") {
                return ParsedChunk {
                    delta: Some(delta),
                    usage,
                    ..ParsedChunk::default()
                };
            }
        }

        // Fallback: tolerate vendor extensions
        let Ok(v) = serde_json::from_str::<Value>(data) else {
            tracing::debug!(data = %data, "skipping unparseable chunk");
            return ParsedChunk::default();
        };

        if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return ParsedChunk::failed(message);
        }

        let delta: String = v
            .get("choices")
            .and_then(Value::as_array)
            .map(|choices| {
                choices
                    .iter()
                    .filter_map(|c| c.pointer("/delta/content").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        let usage = v
            .get("usage")
            .or_else(|| v.pointer("/x_groq/usage"))
            .and_then(usage_from_value);

        ParsedChunk {
            delta: Some(delta),
            usage,
            ..ParsedChunk::default()
        }
    }
}

/// OpenAI Chat Completions 的 SSE 流式实现
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAIProvider {
    pub fn new(config: &BackendConfig) -> Result<Self, BenchError> {
        let api_key = config.require_api_key("openai")?.to_string();
        let base_url = config.base_url_or(DEFAULT_BASE_URL).to_string();
        let client = client_for_url(&base_url)
            .map_err(|e| BenchError::configuration("openai.base_url", e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn body(request: &ChatRequest) -> Value {
        let max_tokens_field = if disallows_sampling_parameters(&request.model) {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        chat_completions_body(
            request,
            ChatBodyOptions {
                include_model: true,
                include_usage: true,
                max_tokens_field,
            },
        )
    }
}

#[async_trait]
impl ChatProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, BenchError> {
        self.validate_request(request)?;

        let url = format!("{}/chat/completions", self.base_url);
        let builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&Self::body(request));

        spawn_sse_stream(self.name(), builder, ChatChunkParser, cancel)
    }
}
