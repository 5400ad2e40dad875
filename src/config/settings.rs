use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::error::{AppError, BenchError, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// 一次运行的全部配置，由命令行参数与环境变量合成
#[derive(Debug, Clone)]
pub struct Settings {
    pub concurrent: usize,
    pub runs: usize,
    pub prompts_dir: PathBuf,
    pub models_file: PathBuf,
    pub output_file: PathBuf,
    pub request_timeout: Duration,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrent: 1,
            runs: 1,
            prompts_dir: PathBuf::from("prompts"),
            models_file: PathBuf::from("models.yaml"),
            output_file: default_output_file(Local::now()),
            request_timeout: request_timeout_from_env(),
            verbose: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.concurrent < 1 {
            return Err(invalid("concurrent", "must be at least 1"));
        }
        if self.runs < 1 {
            return Err(invalid("runs", "must be at least 1"));
        }
        if self.prompts_dir.as_os_str().is_empty() {
            return Err(invalid("prompts_dir", "must not be empty"));
        }
        if !self.prompts_dir.is_dir() {
            return Err(invalid(
                "prompts_dir",
                format!("directory does not exist: {}", self.prompts_dir.display()),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: impl Into<String>) -> AppError {
    AppError::Bench(BenchError::configuration(field, message))
}

/// `results/benchmark_YYYY-MM-DD_HH-MM-SS.csv`
pub fn default_output_file(now: DateTime<Local>) -> PathBuf {
    Path::new("results").join(format!("benchmark_{}.csv", now.format("%Y-%m-%d_%H-%M-%S")))
}

pub fn request_timeout_from_env() -> Duration {
    std::env::var("LLM_BENCH_REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
}

/// 单个后端的凭据与地址覆盖
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
}

impl BackendConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
    }

    pub fn require_api_key(&self, backend: &str) -> std::result::Result<&str, BenchError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                BenchError::configuration(format!("{backend}.api_key"), "API key is not configured")
            })
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Backend configs read from the process environment (after `.env` has been loaded).
pub fn backend_configs_from_env() -> Vec<(String, BackendConfig)> {
    backend_configs_with(|name| std::env::var(name).ok())
}

pub fn backend_configs_with(
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<(String, BackendConfig)> {
    let openai_key = non_empty(&lookup, "OPENAI_API_KEY");
    let openai_base = non_empty(&lookup, "OPENAI_BASE_URL");

    vec![
        (
            "openai".to_string(),
            BackendConfig {
                api_key: openai_key.clone(),
                base_url: openai_base.clone(),
                api_version: None,
            },
        ),
        (
            "openai_responses".to_string(),
            BackendConfig {
                api_key: openai_key,
                base_url: openai_base,
                api_version: None,
            },
        ),
        (
            "groq".to_string(),
            BackendConfig {
                api_key: non_empty(&lookup, "GROQ_API_KEY"),
                base_url: non_empty(&lookup, "GROQ_BASE_URL"),
                api_version: None,
            },
        ),
        (
            "anthropic".to_string(),
            BackendConfig {
                api_key: non_empty(&lookup, "ANTHROPIC_API_KEY"),
                base_url: non_empty(&lookup, "ANTHROPIC_BASE_URL"),
                api_version: None,
            },
        ),
        (
            "azure_openai".to_string(),
            BackendConfig {
                api_key: non_empty(&lookup, "AZURE_OPENAI_API_KEY"),
                base_url: non_empty(&lookup, "AZURE_OPENAI_ENDPOINT"),
                api_version: non_empty(&lookup, "AZURE_OPENAI_API_VERSION"),
            },
        ),
        (
            "gemini".to_string(),
            BackendConfig {
                api_key: non_empty(&lookup, "GOOGLE_API_KEY"),
                base_url: non_empty(&lookup, "GEMINI_BASE_URL"),
                api_version: None,
            },
        ),
    ]
}
