pub mod benchmark;
pub mod cli;
pub mod config;
pub mod error;
pub mod http_client;
pub mod output;
pub mod providers;

pub use error::{AppError, BenchError, Result};
