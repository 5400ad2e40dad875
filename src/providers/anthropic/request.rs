use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::providers::common::merge_extras;
use crate::providers::types::ChatRequest;

pub const DEFAULT_MAX_TOKENS: u32 = 1024;

const RESERVED_KEYS: &[&str] = &["model", "stream", "messages"];

/// Messages API 请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

impl AnthropicRequest {
    pub fn from_chat(request: &ChatRequest) -> Self {
        Self {
            model: request.model.clone(),
            max_tokens: request
                .max_tokens
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system().map(str::to_string),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.user_prompt.clone(),
            }],
            temperature: request.temperature,
            top_p: request.top_p,
            stream: true,
        }
    }
}

/// Serialized request body with extras applied.
pub fn build_body(request: &ChatRequest) -> Value {
    let mut body = serde_json::to_value(AnthropicRequest::from_chat(request))
        .unwrap_or_else(|_| Value::Object(Default::default()));
    if let Value::Object(map) = &mut body {
        merge_extras(map, &request.extra, RESERVED_KEYS);
    }
    body
}
