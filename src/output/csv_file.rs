use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use super::ResultSink;
use crate::benchmark::{BenchmarkResult, Summary};
use crate::error::Result;

const MAX_RESPONSE_CHARS: usize = 1000;

const HEADER: [&str; 16] = [
    "Provider",
    "Model",
    "PromptFile",
    "StartTime",
    "FirstTokenTime",
    "EndTime",
    "TTFT_MS",
    "TotalTime_MS",
    "InputTokens",
    "OutputTokens",
    "TotalTokens",
    "TokensPerSecond",
    "Cost",
    "Success",
    "Error",
    "Response",
];

/// 将每次调用写为 `path` 中的一行，并在同目录写出 `<stem>_summary.csv` 汇总
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn summary_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("benchmark");
        self.path.with_file_name(format!("{stem}_summary.csv"))
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn write_results(&self, results: &[BenchmarkResult]) -> Result<()> {
        let mut w = csv::Writer::from_path(&self.path)?;
        w.write_record(HEADER)?;
        for r in results {
            w.write_record(row(r))?;
        }
        w.flush()?;
        Ok(())
    }

    fn write_summary(&self, summary: &Summary) -> Result<()> {
        let mut w = csv::Writer::from_path(self.summary_path())?;
        w.write_record(["metric", "value"])?;
        for (metric, value) in summary_rows(summary) {
            w.write_record([metric, value.as_str()])?;
        }
        w.flush()?;
        Ok(())
    }
}

impl ResultSink for CsvSink {
    fn write(&self, results: &[BenchmarkResult], summary: &Summary) -> Result<()> {
        self.ensure_parent()?;
        self.write_results(results)?;
        self.write_summary(summary)?;
        tracing::info!(path = %self.path.display(), rows = results.len(), "results written");
        Ok(())
    }
}

fn timestamp(dt: Option<&DateTime<Utc>>) -> String {
    dt.map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

fn millis(d: Duration) -> String {
    format!("{:.2}", d.as_secs_f64() * 1000.0)
}

fn truncate_response(text: &str) -> String {
    if text.chars().count() <= MAX_RESPONSE_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_RESPONSE_CHARS).collect();
    out.push_str("...");
    out
}

fn row(r: &BenchmarkResult) -> Vec<String> {
    vec![
        r.provider.clone(),
        r.model.clone(),
        r.prompt_name.clone(),
        timestamp(Some(&r.start_time)),
        timestamp(r.first_token_time.as_ref()),
        timestamp(r.end_time.as_ref()),
        millis(r.ttft),
        millis(r.total_time),
        r.input_tokens.to_string(),
        r.output_tokens.to_string(),
        r.total_tokens.to_string(),
        format!("{:.2}", r.tokens_per_second),
        format!("{:.6}", r.cost),
        r.success.to_string(),
        r.error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        truncate_response(&r.response),
    ]
}

fn summary_rows(s: &Summary) -> Vec<(&'static str, String)> {
    vec![
        ("total_runs", s.total_runs.to_string()),
        ("successful_runs", s.successful_runs.to_string()),
        ("failed_runs", s.failed_runs.to_string()),
        ("error_rate_percent", format!("{:.2}", s.error_rate_percent())),
        ("ttft_mean_ms", millis(s.ttft.mean)),
        ("ttft_min_ms", millis(s.ttft.min)),
        ("ttft_max_ms", millis(s.ttft.max)),
        ("ttft_p50_ms", millis(s.ttft.p50)),
        ("ttft_p95_ms", millis(s.ttft.p95)),
        ("ttft_p99_ms", millis(s.ttft.p99)),
        ("total_time_mean_ms", millis(s.total_time.mean)),
        ("total_time_min_ms", millis(s.total_time.min)),
        ("total_time_max_ms", millis(s.total_time.max)),
        ("total_time_p50_ms", millis(s.total_time.p50)),
        ("total_time_p95_ms", millis(s.total_time.p95)),
        ("total_time_p99_ms", millis(s.total_time.p99)),
        ("total_cost", format!("{:.6}", s.total_cost)),
        ("average_cost", format!("{:.6}", s.average_cost)),
        ("total_input_tokens", s.total_input_tokens.to_string()),
        ("total_output_tokens", s.total_output_tokens.to_string()),
        ("total_tokens", s.total_tokens.to_string()),
        (
            "average_tokens_per_second",
            format!("{:.2}", s.average_tokens_per_second),
        ),
    ]
}
