use std::fmt::Write;
use std::time::Duration;

use crate::benchmark::{ModelSummary, Summary};

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Human-readable end-of-run report: overall numbers plus one line per (provider, model).
pub fn render_report(summary: &Summary, by_model: &[ModelSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Benchmark summary ===");
    let _ = writeln!(
        out,
        "Runs: {} total, {} ok, {} failed ({:.1}% errors)",
        summary.total_runs,
        summary.successful_runs,
        summary.failed_runs,
        summary.error_rate_percent()
    );
    let _ = writeln!(
        out,
        "TTFT ms:  mean {:.1}  min {:.1}  max {:.1}  p50 {:.1}  p95 {:.1}  p99 {:.1}",
        ms(summary.ttft.mean),
        ms(summary.ttft.min),
        ms(summary.ttft.max),
        ms(summary.ttft.p50),
        ms(summary.ttft.p95),
        ms(summary.ttft.p99)
    );
    let _ = writeln!(
        out,
        "Total ms: mean {:.1}  min {:.1}  max {:.1}  p50 {:.1}  p95 {:.1}  p99 {:.1}",
        ms(summary.total_time.mean),
        ms(summary.total_time.min),
        ms(summary.total_time.max),
        ms(summary.total_time.p50),
        ms(summary.total_time.p95),
        ms(summary.total_time.p99)
    );
    let _ = writeln!(
        out,
        "Tokens: {} in / {} out, {:.1} tok/s avg",
        summary.total_input_tokens, summary.total_output_tokens, summary.average_tokens_per_second
    );
    let _ = writeln!(
        out,
        "Cost: ${:.6} total, ${:.6} per call",
        summary.total_cost, summary.average_cost
    );

    if !by_model.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<18} {:<32} {:>5} {:>7} {:>10} {:>10} {:>10} {:>10}",
            "provider", "model", "runs", "errors", "ttft p50", "ttft p95", "tok/s", "cost"
        );
        for m in by_model {
            let s = &m.summary;
            let _ = writeln!(
                out,
                "{:<18} {:<32} {:>5} {:>6.1}% {:>10.1} {:>10.1} {:>10.1} {:>10.6}",
                m.provider,
                m.model,
                s.total_runs,
                s.error_rate_percent(),
                ms(s.ttft.p50),
                ms(s.ttft.p95),
                s.average_tokens_per_second,
                s.total_cost
            );
        }
    }
    out
}
