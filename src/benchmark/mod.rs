pub mod cost;
pub mod metrics;
pub mod runner;
pub mod summary;

pub use metrics::{BenchmarkResult, Metrics};
pub use runner::{RunState, Runner, RunnerConfig};
pub use summary::{
    LatencyStats, ModelSummary, Summary, calculate_summary, percentile, summarize_by_model,
};
