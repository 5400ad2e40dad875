use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::common::truncate_for_error;
use super::types::{EventStream, StreamEvent, TokenUsage};
use crate::error::BenchError;

const STREAM_BUFFER: usize = 64;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// 一条 SSE 消息对响应的贡献：增量文本、usage、错误或结束标记
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedChunk {
    pub delta: Option<String>,
    pub usage: Option<TokenUsage>,
    pub done: bool,
    pub error: Option<String>,
}

impl ParsedChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            ..Self::default()
        }
    }

    pub fn finished(usage: Option<TokenUsage>) -> Self {
        Self {
            usage,
            done: true,
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// 各厂商的流式报文格式。`event` 为 SSE 的 `event:` 字段（缺省时为 "message"）
pub trait ChunkParser: Send + 'static {
    fn parse(&mut self, event: &str, data: &str) -> ParsedChunk;
}

/// 发起 SSE 请求，在后台任务中把解析后的 chunk 写入有界 channel：
/// - 返回的流以 `done` 事件或错误事件结束
/// - 后台任务意外退出时 channel 关闭，调用方需自行处理
pub fn spawn_sse_stream<P: ChunkParser>(
    provider: &str,
    request: reqwest::RequestBuilder,
    parser: P,
    cancel: CancellationToken,
) -> Result<EventStream, BenchError> {
    let es = request.eventsource().map_err(|e| {
        BenchError::provider(provider, "failed to open event stream").with_cause(e)
    })?;

    let (tx, rx) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);
    let provider = provider.to_string();
    tokio::spawn(pump_events(provider, es, parser, cancel, tx));

    Ok(Box::pin(ReceiverStream::new(rx)))
}

async fn pump_events<P: ChunkParser>(
    provider: String,
    mut es: EventSource,
    mut parser: P,
    cancel: CancellationToken,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut usage: Option<TokenUsage> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(provider = %provider, "stream cancelled");
                let _ = tx.send(StreamEvent::error(BenchError::cancelled("stream_chat"))).await;
                break;
            }
            ev = es.next() => ev,
        };

        let Some(ev) = next else {
            let _ = tx.send(StreamEvent::done(usage)).await;
            break;
        };

        match ev {
            Ok(Event::Open) => {}
            Ok(Event::Message(m)) => {
                if m.data.trim() == "[DONE]" {
                    let _ = tx.send(StreamEvent::done(usage)).await;
                    break;
                }

                let parsed = parser.parse(&m.event, &m.data);
                if let Some(message) = parsed.error {
                    tracing::warn!(provider = %provider, error = %message, "in-band stream error");
                    let _ = tx
                        .send(StreamEvent::error(BenchError::provider(&provider, message)))
                        .await;
                    break;
                }
                if parsed.usage.is_some() {
                    usage = parsed.usage;
                }
                if let Some(delta) = parsed.delta.filter(|d| !d.is_empty()) {
                    if tx.send(StreamEvent::delta(delta)).await.is_err() {
                        // receiver dropped
                        break;
                    }
                }
                if parsed.done {
                    let _ = tx.send(StreamEvent::done(usage)).await;
                    break;
                }
            }
            Err(reqwest_eventsource::Error::StreamEnded) => {
                let _ = tx.send(StreamEvent::done(usage)).await;
                break;
            }
            Err(e) => {
                let err = map_eventsource_error(&provider, e).await;
                tracing::warn!(provider = %provider, error = %err, "stream error");
                let _ = tx.send(StreamEvent::error(err)).await;
                break;
            }
        }
    }

    es.close();
}

pub async fn map_eventsource_error(provider: &str, err: reqwest_eventsource::Error) -> BenchError {
    use reqwest_eventsource::Error;

    match err {
        Error::InvalidStatusCode(status, response) => {
            if status == StatusCode::TOO_MANY_REQUESTS {
                return BenchError::RateLimit {
                    provider: provider.to_string(),
                    retry_after: retry_after(response.headers()),
                };
            }
            let body = response.text().await.unwrap_or_default();
            let detail = truncate_for_error(&body);
            let message = format!("HTTP error {}: {detail}", status.as_u16());
            BenchError::provider(provider, message)
        }
        Error::InvalidContentType(content_type, response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            BenchError::provider(
                provider,
                format!(
                    "unexpected content type {:?} (HTTP {}): {}",
                    content_type,
                    status.as_u16(),
                    truncate_for_error(&body)
                ),
            )
        }
        Error::Transport(e) => {
            let message = if e.is_timeout() {
                "request timeout"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "transport error"
            };
            BenchError::provider(provider, message).with_cause(e)
        }
        other => BenchError::provider(provider, "stream error").with_cause(other),
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct PlainText;

    impl ChunkParser for PlainText {
        fn parse(&mut self, event: &str, data: &str) -> ParsedChunk {
            match event {
                "fail" => ParsedChunk::failed(data),
                "usage" => ParsedChunk {
                    usage: Some(TokenUsage::new(3, 4)),
                    ..ParsedChunk::default()
                },
                _ => ParsedChunk::text(data),
            }
        }
    }

    async fn stream_from(server: &MockServer) -> EventStream {
        let client = reqwest::Client::new();
        let req = client.post(format!("{}/sse", server.uri()));
        spawn_sse_stream("plain", req, PlainText, CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn done_marker_ends_stream_with_usage() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            ("", "Hel"),
            ("", ""),
            ("", "lo"),
            ("usage", "{}"),
            ("", "[DONE]"),
        ]);
        Mock::given(method("POST"))
            .and(path("/sse"))
            .respond_with(sse_response(body))
            .mount(&server)
            .await;

        let events = collect(stream_from(&server).await).await;
        assert_eq!(text_of(&events), "Hello");
        // empty deltas are not forwarded
        assert_eq!(events.len(), 3);
        let last = events.last().unwrap();
        assert!(last.done);
        assert_eq!(last.usage, Some(TokenUsage::new(3, 4)));
    }

    #[tokio::test]
    async fn end_of_body_counts_as_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(sse_body(&[("", "only")])))
            .mount(&server)
            .await;

        let events = collect(stream_from(&server).await).await;
        assert_eq!(text_of(&events), "only");
        assert!(events.last().unwrap().done);
        assert!(events.last().unwrap().error.is_none());
    }

    #[tokio::test]
    async fn in_band_error_is_terminal() {
        let server = MockServer::start().await;
        let body = sse_body(&[("", "partial"), ("fail", "overloaded"), ("", "never")]);
        Mock::given(method("POST"))
            .respond_with(sse_response(body))
            .mount(&server)
            .await;

        let events = collect(stream_from(&server).await).await;
        let last = events.last().unwrap();
        assert!(matches!(
            &last.error,
            Some(BenchError::Provider { message, .. }) if message == "overloaded"
        ));
        assert!(!text_of(&events).contains("never"));
    }

    #[tokio::test]
    async fn http_429_maps_to_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let events = collect(stream_from(&server).await).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].error,
            Some(BenchError::RateLimit {
                provider: "plain".into(),
                retry_after: Duration::from_secs(7)
            })
        );
    }

    #[tokio::test]
    async fn unusable_retry_after_falls_back_to_default() {
        for header_value in ["1e30", "-5", "Wed, 21 Oct 2015 07:28:00 GMT"] {
            let server = MockServer::start().await;
            let limited = ResponseTemplate::new(429);
            Mock::given(method("POST"))
                .respond_with(limited.insert_header("retry-after", header_value))
                .mount(&server)
                .await;

            let events = collect(stream_from(&server).await).await;
            assert_eq!(events.len(), 1, "retry-after {header_value}");
            assert_eq!(
                events[0].error,
                Some(BenchError::RateLimit {
                    provider: "plain".into(),
                    retry_after: DEFAULT_RETRY_AFTER,
                })
            );
        }
    }

    #[tokio::test]
    async fn http_error_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let events = collect(stream_from(&server).await).await;
        let err = events[0].error.as_ref().unwrap();
        assert_eq!(
            err.to_string(),
            "plain provider error: HTTP error 401: invalid api key"
        );
    }

    #[tokio::test]
    async fn cancellation_tears_down_the_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                sse_response(sse_body(&[("", "late")])).set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let client = reqwest::Client::new();
        let req = client.post(format!("{}/sse", server.uri()));
        let stream = spawn_sse_stream("plain", req, PlainText, cancel.clone()).unwrap();
        cancel.cancel();

        let events = tokio::time::timeout(Duration::from_secs(5), collect(stream))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].error, Some(BenchError::Cancelled { .. })));
    }
}
