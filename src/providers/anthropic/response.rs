use serde::Deserialize;

use crate::providers::streaming::{ChunkParser, ParsedChunk};
use crate::providers::types::TokenUsage;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStart {
    #[serde(default)]
    pub usage: AnthropicUsage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

/// Messages API 的流式事件。未知类型（ping、content_block_start 等）一律忽略
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventPayload {
    MessageStart { message: MessageStart },
    ContentBlockDelta { delta: ContentDelta },
    MessageDelta {
        #[serde(default)]
        usage: AnthropicUsage,
    },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

/// 在 `message_start`（输入）与 `message_delta`（输出）之间累计 usage
#[derive(Debug, Default)]
pub struct AnthropicEventParser {
    usage: TokenUsage,
    seen_usage: bool,
}

impl AnthropicEventParser {
    fn absorb(&mut self, usage: &AnthropicUsage) {
        if let Some(input) = usage.input_tokens {
            self.usage.input = input;
            self.seen_usage = true;
        }
        if let Some(output) = usage.output_tokens {
            self.usage.output = output;
            self.seen_usage = true;
        }
    }

    fn current_usage(&self) -> Option<TokenUsage> {
        self.seen_usage.then_some(self.usage)
    }
}

impl ChunkParser for AnthropicEventParser {
    fn parse(&mut self, _event: &str, data: &str) -> ParsedChunk {
        let payload = match serde_json::from_str::<StreamEventPayload>(data) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognised anthropic event");
                return ParsedChunk::default();
            }
        };

        match payload {
            StreamEventPayload::MessageStart { message } => {
                self.absorb(&message.usage);
                ParsedChunk {
                    usage: self.current_usage(),
                    ..ParsedChunk::default()
                }
            }
            StreamEventPayload::ContentBlockDelta {
                delta: ContentDelta::TextDelta { text },
            } => ParsedChunk::text(text),
            StreamEventPayload::ContentBlockDelta { .. } => ParsedChunk::default(),
            StreamEventPayload::MessageDelta { usage } => {
                self.absorb(&usage);
                ParsedChunk {
                    usage: self.current_usage(),
                    ..ParsedChunk::default()
                }
            }
            StreamEventPayload::MessageStop => ParsedChunk::finished(self.current_usage()),
            StreamEventPayload::Error { error } => {
                let message = if error.message.is_empty() {
                    error.error_type
                } else {
                    format!("{}: {}", error.error_type, error.message)
                };
                ParsedChunk::failed(message)
            }
            StreamEventPayload::Other => ParsedChunk::default(),
        }
    }
}
