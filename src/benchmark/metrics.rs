use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::BenchError;

/// 单次基准调用的最终结果
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub provider: String,
    pub model: String,
    pub prompt_name: String,
    pub start_time: DateTime<Utc>,
    pub first_token_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub ttft: Duration,
    pub total_time: Duration,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub tokens_per_second: f64,
    pub cost: f64,
    pub success: bool,
    pub error: Option<BenchError>,
    pub response: String,
}

#[derive(Debug)]
struct MetricsState {
    start_time: DateTime<Utc>,
    started: Instant,
    first_token_time: Option<DateTime<Utc>>,
    first_token_at: Option<Instant>,
    end_time: Option<DateTime<Utc>>,
    input_tokens: u32,
    output_tokens: u32,
    response: String,
    ttft: Duration,
    total_time: Duration,
    tokens_per_second: f64,
    error: Option<BenchError>,
    success: bool,
    finalized: bool,
}

/// 单次调用的计量器。报告使用墙钟时间戳，耗时使用单调时钟
#[derive(Debug)]
pub struct Metrics {
    provider: String,
    model: String,
    prompt_name: String,
    state: Mutex<MetricsState>,
}

impl Metrics {
    /// Starts the clock.
    pub fn start(provider: &str, model: &str, prompt_name: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            prompt_name: prompt_name.to_string(),
            state: Mutex::new(MetricsState {
                start_time: Utc::now(),
                started: Instant::now(),
                first_token_time: None,
                first_token_at: None,
                end_time: None,
                input_tokens: 0,
                output_tokens: 0,
                response: String::new(),
                ttft: Duration::ZERO,
                total_time: Duration::ZERO,
                tokens_per_second: 0.0,
                error: None,
                success: false,
                finalized: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Only the first call has any effect.
    pub fn record_first_token(&self) {
        let mut s = self.lock();
        if s.first_token_at.is_none() && !s.finalized {
            s.first_token_at = Some(Instant::now());
            s.first_token_time = Some(Utc::now());
        }
    }

    /// Appends a streamed fragment; empty fragments are ignored entirely.
    pub fn append_delta(&self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.record_first_token();
        let mut s = self.lock();
        if !s.finalized {
            s.response.push_str(delta);
        }
    }

    pub fn response_text(&self) -> String {
        self.lock().response.clone()
    }

    pub fn set_tokens(&self, input: u32, output: u32) {
        let mut s = self.lock();
        if !s.finalized {
            s.input_tokens = input;
            s.output_tokens = output;
        }
    }

    /// Drops text, token counts and the first-token mark captured so far.
    pub fn discard_partial(&self) {
        let mut s = self.lock();
        if s.finalized {
            return;
        }
        s.response.clear();
        s.input_tokens = 0;
        s.output_tokens = 0;
        s.first_token_at = None;
        s.first_token_time = None;
    }

    pub fn complete(&self) {
        let mut s = self.lock();
        if s.finalized {
            return;
        }
        let started = s.started;
        let total_time = Instant::now().duration_since(started);
        let ttft = s
            .first_token_at
            .map(|t| t.duration_since(started))
            .unwrap_or(Duration::ZERO);
        let secs = total_time.as_secs_f64();
        let tokens_per_second = if secs > 0.0 && s.output_tokens > 0 {
            s.output_tokens as f64 / secs
        } else {
            0.0
        };

        s.end_time = Some(Utc::now());
        s.total_time = total_time;
        s.ttft = ttft;
        s.tokens_per_second = tokens_per_second;
        s.success = true;
        s.finalized = true;
    }

    /// Marks the call failed. Timing and throughput stay at zero.
    pub fn set_error(&self, error: BenchError) {
        let mut s = self.lock();
        if s.finalized {
            return;
        }
        s.end_time = Some(Utc::now());
        s.error = Some(error);
        s.success = false;
        s.finalized = true;
    }

    pub fn to_result(&self, cost: f64) -> BenchmarkResult {
        let s = self.lock();
        BenchmarkResult {
            provider: self.provider.clone(),
            model: self.model.clone(),
            prompt_name: self.prompt_name.clone(),
            start_time: s.start_time,
            first_token_time: s.first_token_time,
            end_time: s.end_time,
            ttft: s.ttft,
            total_time: s.total_time,
            input_tokens: s.input_tokens,
            output_tokens: s.output_tokens,
            total_tokens: s.input_tokens.saturating_add(s.output_tokens),
            tokens_per_second: s.tokens_per_second,
            cost: if s.success { cost } else { 0.0 },
            success: s.success,
            error: s.error.clone(),
            response: s.response.clone(),
        }
    }
}
