use std::ops::RangeInclusive;
use std::time::Duration;

use serde_json::{Map, Value};

use super::types::ChatRequest;
use crate::error::BenchError;

pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const RETRY_JITTER_UNIT: Duration = Duration::from_millis(100);

/// Transient failure markers shared by every backend.
pub const COMMON_RETRY_MARKERS: &[&str] = &[
    "rate_limit",
    "rate limit",
    "429",
    "500",
    "502",
    "503",
    "504",
    "timeout",
    "deadline exceeded",
    "connection refused",
    "connection reset",
    "no route to host",
    "network is unreachable",
];

/// Roughly four characters per token. Never zero for non-empty text.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    u32::try_from(chars / 4).unwrap_or(u32::MAX).max(1)
}

pub fn validate_request(
    request: &ChatRequest,
    temperature_range: RangeInclusive<f64>,
) -> Result<(), BenchError> {
    if request.model.trim().is_empty() {
        return Err(BenchError::validation("model", "model is required"));
    }
    if request.user_prompt.trim().is_empty() {
        return Err(BenchError::validation("user_prompt", "user prompt is required"));
    }
    if request.max_tokens.is_some_and(|n| n < 0) {
        return Err(BenchError::validation("max_tokens", "must not be negative"));
    }
    if request
        .temperature
        .is_some_and(|t| !temperature_range.contains(&t))
    {
        return Err(BenchError::validation(
            "temperature",
            format!(
                "must be between {} and {}",
                temperature_range.start(),
                temperature_range.end()
            ),
        ));
    }
    if request.top_p.is_some_and(|p| !(0.0..=1.0).contains(&p)) {
        return Err(BenchError::validation("top_p", "must be between 0 and 1"));
    }
    Ok(())
}

/// Timeouts and rate limits are always transient, configuration and validation never are.
/// Provider errors are matched case-insensitively against `markers` plus the common list.
pub fn is_retryable(error: &BenchError, markers: &[&str]) -> bool {
    match error {
        BenchError::Timeout { .. } | BenchError::RateLimit { .. } => true,
        BenchError::Configuration { .. }
        | BenchError::Validation { .. }
        | BenchError::Cancelled { .. } => false,
        BenchError::Provider { message, cause, .. } => {
            let haystack = format!("{} {}", message, cause.as_deref().unwrap_or_default())
                .to_lowercase();
            COMMON_RETRY_MARKERS
                .iter()
                .chain(markers.iter())
                .any(|m| haystack.contains(&m.to_lowercase()))
        }
    }
}

/// `min(attempt², 30s) + attempt × 100ms`
pub fn quadratic_backoff(attempt: u32) -> Duration {
    let base = Duration::from_secs(u64::from(attempt).saturating_mul(u64::from(attempt)));
    base.min(MAX_RETRY_DELAY) + RETRY_JITTER_UNIT * attempt
}

/// `min(2^attempt, 30s) + attempt × 100ms`
pub fn exponential_backoff(attempt: u32) -> Duration {
    let base = 1u64
        .checked_shl(attempt)
        .map(Duration::from_secs)
        .unwrap_or(MAX_RETRY_DELAY);
    base.min(MAX_RETRY_DELAY) + RETRY_JITTER_UNIT * attempt
}

/// Honors a `retry_after` hint on rate-limit errors when it is longer than the computed delay.
/// The hint never pushes the delay past [`MAX_RETRY_DELAY`].
pub fn delay_with_hint(computed: Duration, error: &BenchError) -> Duration {
    match error {
        BenchError::RateLimit { retry_after, .. } => {
            computed.max((*retry_after).min(MAX_RETRY_DELAY))
        }
        _ => computed,
    }
}

/// Overlays request extras on top of a computed JSON body, except for `reserved` keys.
pub fn merge_extras(body: &mut Map<String, Value>, extra: &Map<String, Value>, reserved: &[&str]) {
    for (key, value) in extra {
        if reserved.contains(&key.as_str()) {
            tracing::debug!(key = %key, "ignoring reserved request parameter");
            continue;
        }
        body.insert(key.clone(), value.clone());
    }
}

/// Reasoning model families reject temperature / top_p.
pub fn disallows_sampling_parameters(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    ["o1", "o3", "o4", "gpt-5"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

/// Error bodies can be large HTML pages; keep the first few hundred chars.
pub fn truncate_for_error(body: &str) -> String {
    const LIMIT: usize = 500;
    let body = body.trim();
    if body.chars().count() <= LIMIT {
        body.to_string()
    } else {
        let mut out: String = body.chars().take(LIMIT).collect();
        out.push_str("...");
        out
    }
}
