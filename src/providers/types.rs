use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio_stream::Stream;

use crate::config::Prompt;
use crate::error::BenchError;

/// 统一的聊天请求, 与任何厂商的原生消息结构解耦
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    /// Backend-specific parameters merged over the computed payload.
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            user_prompt: user_prompt.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            extra: Map::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Builds a request from a prompt file plus the model's `parameters` table.
    /// `max_tokens`, `temperature` and `top_p` become typed fields; every other key is an extra.
    pub fn from_prompt(
        model: impl Into<String>,
        prompt: &Prompt,
        parameters: Option<&Map<String, Value>>,
    ) -> Self {
        let mut request = Self::new(model, prompt.user.clone());
        request.system_prompt = prompt.system.clone().filter(|s| !s.trim().is_empty());

        for (key, value) in parameters.into_iter().flatten() {
            match key.as_str() {
                "max_tokens" if value.is_i64() || value.is_u64() => {
                    request.max_tokens = value.as_i64();
                }
                "temperature" if value.is_number() => request.temperature = value.as_f64(),
                "top_p" if value.is_number() => request.top_p = value.as_f64(),
                _ => {
                    request.extra.insert(key.clone(), value.clone());
                }
            }
        }
        request
    }

    pub fn system(&self) -> Option<&str> {
        self.system_prompt
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }

    /// system + "\n\n" + user, or just user.
    pub fn input_text(&self) -> String {
        match self.system() {
            Some(system) => format!("{}\n\n{}", system, self.user_prompt),
            None => self.user_prompt.clone(),
        }
    }
}

/// 后端在流中上报的精确 token 数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
}

impl TokenUsage {
    pub fn new(input: u32, output: u32) -> Self {
        Self { input, output }
    }
}

/// 估算得到的 token 数（后端未上报 usage 时使用）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCount {
    pub input: u32,
    pub output: u32,
    pub total: u32,
}

impl TokenCount {
    pub fn new(input: u32, output: u32) -> Self {
        Self {
            input,
            output,
            total: input.saturating_add(output),
        }
    }
}

impl From<TokenUsage> for TokenCount {
    fn from(u: TokenUsage) -> Self {
        Self::new(u.input, u.output)
    }
}

/// 流式响应中的单个事件
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub delta: String,
    pub done: bool,
    pub timestamp: DateTime<Utc>,
    pub error: Option<BenchError>,
    pub usage: Option<TokenUsage>,
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            done: false,
            timestamp: Utc::now(),
            error: None,
            usage: None,
        }
    }

    pub fn done(usage: Option<TokenUsage>) -> Self {
        Self {
            delta: String::new(),
            done: true,
            timestamp: Utc::now(),
            error: None,
            usage,
        }
    }

    pub fn error(error: BenchError) -> Self {
        Self {
            delta: String::new(),
            done: true,
            timestamp: Utc::now(),
            error: Some(error),
            usage: None,
        }
    }
}

/// Provider 返回的事件流，最后一个事件必为结束或错误
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
