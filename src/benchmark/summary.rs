use std::collections::BTreeMap;
use std::time::Duration;

use super::metrics::BenchmarkResult;

/// 一组延迟样本的统计量：均值、最值与 p50/p95/p99 分位数
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencyStats {
    /// Empty input gives all zeros.
    pub fn from_samples(mut samples: Vec<Duration>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();
        let n = samples.len();
        let sum: Duration = samples.iter().sum();
        Self {
            mean: sum / n as u32,
            min: samples[0],
            max: samples[n - 1],
            p50: percentile(&samples, 50.0),
            p95: percentile(&samples, 95.0),
            p99: percentile(&samples, 99.0),
        }
    }
}

/// Nearest-rank percentile over an ascending slice: index `ceil(p/100 * n) - 1`, clamped.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let n = sorted.len();
    let rank = (p * n as f64 / 100.0).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

/// 整次运行的汇总：成功/失败次数、TTFT 与总耗时统计、吞吐与成本
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    /// Fraction in `[0, 1]`.
    pub error_rate: f64,
    pub ttft: LatencyStats,
    pub total_time: LatencyStats,
    pub total_cost: f64,
    pub average_cost: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub average_tokens_per_second: f64,
}

impl Summary {
    pub fn error_rate_percent(&self) -> f64 {
        self.error_rate * 100.0
    }
}

pub fn calculate_summary(results: &[BenchmarkResult]) -> Summary {
    let total_runs = results.len();
    if total_runs == 0 {
        return Summary::default();
    }

    let ok: Vec<&BenchmarkResult> = results.iter().filter(|r| r.success).collect();
    let successful_runs = ok.len();
    let failed_runs = total_runs - successful_runs;

    let total_cost: f64 = ok.iter().map(|r| r.cost).sum();
    let total_input_tokens: u64 = ok.iter().map(|r| u64::from(r.input_tokens)).sum();
    let total_output_tokens: u64 = ok.iter().map(|r| u64::from(r.output_tokens)).sum();
    let (average_cost, average_tokens_per_second) = if successful_runs > 0 {
        let n = successful_runs as f64;
        (
            total_cost / n,
            ok.iter().map(|r| r.tokens_per_second).sum::<f64>() / n,
        )
    } else {
        (0.0, 0.0)
    };

    Summary {
        total_runs,
        successful_runs,
        failed_runs,
        error_rate: failed_runs as f64 / total_runs as f64,
        ttft: LatencyStats::from_samples(ok.iter().map(|r| r.ttft).collect()),
        total_time: LatencyStats::from_samples(ok.iter().map(|r| r.total_time).collect()),
        total_cost,
        average_cost,
        total_input_tokens,
        total_output_tokens,
        total_tokens: total_input_tokens + total_output_tokens,
        average_tokens_per_second,
    }
}

/// 按 provider/model 分组的汇总行
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub provider: String,
    pub model: String,
    pub summary: Summary,
}

/// One summary per (provider, model), ordered by provider then model.
pub fn summarize_by_model(results: &[BenchmarkResult]) -> Vec<ModelSummary> {
    let mut groups: BTreeMap<(&str, &str), Vec<BenchmarkResult>> = BTreeMap::new();
    for r in results {
        groups
            .entry((r.provider.as_str(), r.model.as_str()))
            .or_default()
            .push(r.clone());
    }
    groups
        .into_iter()
        .map(|((provider, model), group)| ModelSummary {
            provider: provider.to_string(),
            model: model.to_string(),
            summary: calculate_summary(&group),
        })
        .collect()
}
