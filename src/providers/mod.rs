pub mod anthropic;
pub mod azure_openai;
pub mod common;
pub mod gemini;
pub mod groq;
pub mod openai;
pub mod openai_responses;
pub mod registry;
pub mod streaming;
pub mod types;

use std::ops::RangeInclusive;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BenchError;

pub use anthropic::AnthropicProvider;
pub use azure_openai::AzureOpenAIProvider;
pub use gemini::GeminiProvider;
pub use groq::GroqProvider;
pub use openai::OpenAIProvider;
pub use openai_responses::OpenAIResponsesProvider;
pub use registry::{ProviderConstructor, ProviderRegistry};
pub use types::{ChatRequest, EventStream, StreamEvent, TokenCount, TokenUsage};

/// 流式聊天后端的统一抽象。
///
/// `stream_chat` 仅在发起前的检查失败时同步返回错误；请求发出后的任何失败
/// 都以携带错误的终止 [`StreamEvent`] 形式出现在流中。
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, BenchError>;

    fn estimate_tokens(&self, text: &str) -> u32 {
        common::estimate_tokens(text)
    }

    fn token_count(&self, input_text: &str, response_text: &str) -> TokenCount {
        TokenCount::new(
            self.estimate_tokens(input_text),
            self.estimate_tokens(response_text),
        )
    }

    fn temperature_range(&self) -> RangeInclusive<f64> {
        0.0..=2.0
    }

    fn validate_request(&self, request: &ChatRequest) -> Result<(), BenchError> {
        common::validate_request(request, self.temperature_range())
    }

    /// Backend-specific transient markers, checked in addition to the common list.
    fn retry_markers(&self) -> &'static [&'static str] {
        &[]
    }

    fn is_retryable_error(&self, error: &BenchError) -> bool {
        common::is_retryable(error, self.retry_markers())
    }

    fn retry_delay(&self, attempt: u32, error: &BenchError) -> Duration {
        common::delay_with_hint(common::quadratic_backoff(attempt), error)
    }
}
