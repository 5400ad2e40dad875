use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use clap::Parser;

use crate::config::Settings;
use crate::config::settings::{default_output_file, request_timeout_from_env};

/// Benchmark time-to-first-token, latency and cost of streaming chat completions.
#[derive(Debug, Parser)]
#[command(name = "llm-bench", version, about)]
pub struct Cli {
    /// Number of concurrent workers (1 = sequential)
    #[arg(short = 'c', long, default_value_t = 1)]
    pub concurrent: usize,

    /// Repetitions of every prompt × model pair
    #[arg(short = 'r', long, default_value_t = 1)]
    pub runs: usize,

    /// Directory containing prompt YAML files
    #[arg(short = 'p', long, default_value = "prompts")]
    pub prompts: PathBuf,

    /// CSV output file [default: results/benchmark_<timestamp>.csv]
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Model pricing / parameter table
    #[arg(short = 'm', long, default_value = "models.yaml")]
    pub models: PathBuf,

    /// Per-call timeout in seconds [default: LLM_BENCH_REQUEST_TIMEOUT_SECS or 60]
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_settings(self) -> Settings {
        Settings {
            concurrent: self.concurrent,
            runs: self.runs,
            prompts_dir: self.prompts,
            models_file: self.models,
            output_file: self
                .output
                .unwrap_or_else(|| default_output_file(Local::now())),
            request_timeout: self
                .timeout
                .map(Duration::from_secs)
                .unwrap_or_else(request_timeout_from_env),
            verbose: self.verbose,
        }
    }
}
