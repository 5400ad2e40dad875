use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

use llm_bench::benchmark::{Runner, RunnerConfig, summarize_by_model};
use llm_bench::cli::Cli;
use llm_bench::config::settings::backend_configs_from_env;
use llm_bench::config::{DirPromptSource, ModelsConfig};
use llm_bench::output::{CsvSink, ResultSink, render_report};
use llm_bench::providers::ProviderRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let settings = Cli::parse().into_settings();

    let default_level = if settings.verbose {
        "llm_bench=debug"
    } else {
        "llm_bench=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).init();

    settings.validate()?;
    let models = Arc::new(ModelsConfig::load(&settings.models_file)?);
    if models.is_empty() {
        tracing::warn!(path = %settings.models_file.display(), "models table is empty");
    }

    let registry = Arc::new(ProviderRegistry::with_builtin_backends());
    for (name, config) in backend_configs_from_env() {
        registry.register_config(&name, config);
    }
    tracing::info!(providers = ?registry.available_providers(), "backends registered");

    let runner = Runner::new(
        registry,
        models,
        Arc::new(DirPromptSource::new(&settings.prompts_dir)),
        RunnerConfig::from(&settings),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping benchmark");
            on_signal.cancel();
        }
    });

    runner.run(cancel).await?;

    let results = runner.results();
    let summary = runner.summary();
    let sink = CsvSink::new(&settings.output_file);
    sink.write(&results, &summary)?;
    println!("{}", render_report(&summary, &summarize_by_model(&results)));

    Ok(())
}
