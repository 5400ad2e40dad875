use std::time::Duration;

use thiserror::Error;

/// 单次调用级别的错误分类，每个失败的调用恰好携带其中一种
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BenchError {
    #[error("configuration error for {field}: {message}")]
    Configuration { field: String, message: String },

    #[error("validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{provider} provider error: {message}{}", .cause.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Provider {
        provider: String,
        message: String,
        cause: Option<String>,
    },

    #[error("timeout after {duration:?} during {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("rate limit exceeded for {provider}, retry after {retry_after:?}")]
    RateLimit {
        provider: String,
        retry_after: Duration,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },
}

impl BenchError {
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(self, cause: impl ToString) -> Self {
        match self {
            Self::Provider {
                provider, message, ..
            } => Self::Provider {
                provider,
                message,
                cause: Some(cause.to_string()),
            },
            other => other,
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Short machine-friendly label, used in logs and the CSV error column prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Validation { .. } => "validation",
            Self::Provider { .. } => "provider",
            Self::Timeout { .. } => "timeout",
            Self::RateLimit { .. } => "rate_limit",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// 运行级别的错误：会中止整个基准测试，而不只是某一次调用
#[derive(Debug, Error)]
pub enum AppError {
    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yml::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bench(#[from] BenchError),
}

pub type Result<T> = std::result::Result<T, AppError>;
