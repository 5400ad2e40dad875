use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::cost::cost_for;
use super::metrics::{BenchmarkResult, Metrics};
use super::summary::{Summary, calculate_summary};
use crate::config::settings::DEFAULT_REQUEST_TIMEOUT;
use crate::config::{ModelPricing, ModelsConfig, Prompt, PromptSource, Settings};
use crate::error::{BenchError, Result};
use crate::providers::{ChatProvider, ChatRequest, ProviderRegistry, TokenUsage};

/// Runner 的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    LoadingPrompts,
    Sequential,
    Concurrent,
    Done,
    Cancelled,
}

/// 并发度、每个组合的重复次数与单次调用超时
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// Worker pool size; 1 or less runs strictly in order.
    pub concurrent: usize,
    pub runs: usize,
    pub request_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrent: 1,
            runs: 1,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl From<&Settings> for RunnerConfig {
    fn from(s: &Settings) -> Self {
        Self {
            concurrent: s.concurrent,
            runs: s.runs,
            request_timeout: s.request_timeout,
        }
    }
}

/// One unit of the prompt × provider × model × repetition cross product.
struct WorkItem {
    provider: Arc<dyn ChatProvider>,
    prompt_name: String,
    request: ChatRequest,
    pricing: Option<ModelPricing>,
    run: usize,
}

/// 基准测试执行器：
/// - 枚举 prompt × provider × model × run 的全部组合
/// - 顺序或以固定数量的 worker 并发执行，每次调用的结果都会被记录
/// - 取消后尽快停止，已完成的结果保留
pub struct Runner {
    registry: Arc<ProviderRegistry>,
    models: Arc<ModelsConfig>,
    prompts: Arc<dyn PromptSource>,
    config: RunnerConfig,
    results: Arc<Mutex<Vec<BenchmarkResult>>>,
    state: Mutex<RunState>,
}

impl Runner {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        models: Arc<ModelsConfig>,
        prompts: Arc<dyn PromptSource>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            models,
            prompts,
            config,
            results: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Copy of everything recorded so far.
    pub fn results(&self) -> Vec<BenchmarkResult> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn summary(&self) -> Summary {
        calculate_summary(&self.results())
    }

    /// 执行整个基准测试。只有提示词加载失败或为空才返回错误；
    /// 单次调用的失败记录为结果，取消时返回 `Ok` 并保留已完成的结果。
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.set_state(RunState::LoadingPrompts);
        let prompts = match self.prompts.load().await {
            Ok(p) => p,
            Err(e) => {
                self.set_state(RunState::Idle);
                return Err(e);
            }
        };
        if prompts.is_empty() {
            self.set_state(RunState::Idle);
            return Err(BenchError::configuration("prompts", "prompt set is empty").into());
        }

        let items = self.work_items(&prompts);
        tracing::info!(
            calls = items.len(),
            workers = self.config.concurrent.max(1),
            "starting benchmark"
        );

        if self.config.concurrent <= 1 {
            self.set_state(RunState::Sequential);
            self.run_sequential(items, &cancel).await;
        } else {
            self.set_state(RunState::Concurrent);
            self.run_concurrent(items, &cancel).await;
        }

        if cancel.is_cancelled() {
            tracing::warn!(recorded = self.results().len(), "benchmark cancelled");
            self.set_state(RunState::Cancelled);
        } else {
            tracing::info!(recorded = self.results().len(), "benchmark finished");
            self.set_state(RunState::Done);
        }
        Ok(())
    }

    fn resolve_providers(&self) -> Vec<(Arc<dyn ChatProvider>, Vec<String>)> {
        let mut resolved = Vec::new();
        for name in self.models.provider_names() {
            let models = self.models.models_for(name);
            if models.is_empty() {
                continue;
            }
            match self.registry.get_provider(name) {
                Ok(provider) => resolved.push((provider, models)),
                Err(e) => {
                    tracing::warn!(provider = %name, error = %e, "skipping provider");
                }
            }
        }
        resolved
    }

    /// Enumerated in prompt → provider → model → repetition order.
    fn work_items(&self, prompts: &[Prompt]) -> Vec<WorkItem> {
        let providers = self.resolve_providers();
        let runs = self.config.runs.max(1);
        let mut items = Vec::new();

        for prompt in prompts {
            for (provider, models) in &providers {
                for model in models {
                    let request = ChatRequest::from_prompt(
                        model.clone(),
                        prompt,
                        self.models.parameters(provider.name(), model),
                    );
                    let pricing = self.models.pricing(provider.name(), model);
                    for run in 1..=runs {
                        items.push(WorkItem {
                            provider: provider.clone(),
                            prompt_name: prompt.name.clone(),
                            request: request.clone(),
                            pricing,
                            run,
                        });
                    }
                }
            }
        }
        items
    }

    fn record(&self, result: BenchmarkResult) {
        record_into(&self.results, result);
    }

    async fn run_sequential(&self, items: Vec<WorkItem>, cancel: &CancellationToken) {
        for item in items {
            if cancel.is_cancelled() {
                return;
            }
            let result = execute_call(&item, cancel, self.config.request_timeout).await;
            self.record(result);
        }
    }

    async fn run_concurrent(&self, items: Vec<WorkItem>, cancel: &CancellationToken) {
        let workers = self.config.concurrent;
        let (tx, rx) = mpsc::channel::<WorkItem>(workers * 2);

        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            for item in items {
                tokio::select! {
                    biased;
                    _ = producer_cancel.cancelled() => break,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            // dropping tx closes the queue
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let rx = rx.clone();
            let cancel = cancel.clone();
            let results = self.results.clone();
            let timeout = self.config.request_timeout;
            handles.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            item = rx.recv() => item,
                        }
                    };
                    let Some(item) = next else { break };
                    let result = execute_call(&item, &cancel, timeout).await;
                    record_into(&results, result);
                }
                tracing::debug!(worker, "worker exited");
            }));
        }
        // workers hold the only receivers now, so the producer unblocks if they all die
        drop(rx);

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "benchmark worker panicked");
            }
        }
        if let Err(e) = producer.await {
            tracing::error!(error = %e, "work producer panicked");
        }
    }
}

fn record_into(results: &Mutex<Vec<BenchmarkResult>>, result: BenchmarkResult) {
    results
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(result);
}

/// Drains the provider stream into `metrics`. Returns provider-reported usage if any.
async fn drive_stream(
    provider: &dyn ChatProvider,
    request: &ChatRequest,
    metrics: &Metrics,
    cancel: CancellationToken,
) -> std::result::Result<Option<TokenUsage>, BenchError> {
    let mut stream = provider.stream_chat(request, cancel).await?;
    let mut usage = None;
    while let Some(event) = stream.next().await {
        if let Some(err) = event.error {
            return Err(err);
        }
        metrics.append_delta(&event.delta);
        if event.usage.is_some() {
            usage = event.usage;
        }
        if event.done {
            return Ok(usage);
        }
    }
    // the adapter task went away without a terminal event
    Err(BenchError::provider(provider.name(), "stream closed without completion"))
}

async fn execute_call(
    item: &WorkItem,
    cancel: &CancellationToken,
    timeout: Duration,
) -> BenchmarkResult {
    let provider = item.provider.as_ref();
    let request = &item.request;
    let metrics = Metrics::start(provider.name(), &request.model, &item.prompt_name);

    if let Err(err) = provider.validate_request(request) {
        tracing::warn!(
            provider = %provider.name(),
            model = %request.model,
            error = %err,
            "invalid request"
        );
        metrics.set_error(err);
        return metrics.to_result(0.0);
    }

    let call_cancel = cancel.child_token();
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BenchError::cancelled("stream_chat")),
        _ = tokio::time::sleep(timeout) => Err(BenchError::timeout("stream_chat", timeout)),
        res = drive_stream(provider, request, &metrics, call_cancel.clone()) => res,
    };
    // stops the adapter task on timeout
    call_cancel.cancel();

    match outcome {
        Ok(reported) => {
            let counts = match reported {
                Some(usage) => usage.into(),
                None => provider.token_count(&request.input_text(), &metrics.response_text()),
            };
            metrics.set_tokens(counts.input, counts.output);
            metrics.complete();
            let result = metrics.to_result(cost_for(
                item.pricing.as_ref(),
                counts.input,
                counts.output,
            ));
            tracing::debug!(
                provider = %result.provider,
                model = %result.model,
                prompt = %result.prompt_name,
                run = item.run,
                ttft_ms = result.ttft.as_millis() as u64,
                total_ms = result.total_time.as_millis() as u64,
                "call completed"
            );
            result
        }
        Err(err) => {
            if matches!(err, BenchError::Cancelled { .. }) {
                metrics.discard_partial();
            }
            tracing::warn!(
                provider = %provider.name(),
                model = %request.model,
                prompt = %item.prompt_name,
                run = item.run,
                error = %err,
                "call failed"
            );
            metrics.set_error(err);
            metrics.to_result(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, DirPromptSource, ModelSpec};
    use crate::error::AppError;
    use crate::providers::{EventStream, StreamEvent, TokenCount};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behaviour {
        Reply { delay_ms: u64, reported: bool },
        Silent,
        InBandError,
        Truncated,
        FailToStart,
        Panic,
    }

    fn reply(delay_ms: u64) -> Behaviour {
        Behaviour::Reply {
            delay_ms,
            reported: false,
        }
    }

    fn instant() -> Behaviour {
        reply(0)
    }

    fn reporting() -> Behaviour {
        Behaviour::Reply {
            delay_ms: 0,
            reported: true,
        }
    }

    struct MockProvider {
        name: &'static str,
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChatProvider for MockProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn stream_chat(
            &self,
            request: &ChatRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<EventStream, BenchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let events = match self.behaviour {
                Behaviour::Panic => panic!("adapter bug"),
                Behaviour::FailToStart => {
                    return Err(BenchError::provider(self.name, "connection refused"));
                }
                Behaviour::Silent => vec![StreamEvent::done(None)],
                Behaviour::Truncated => vec![StreamEvent::delta("half an ans")],
                Behaviour::InBandError => vec![
                    StreamEvent::delta("par"),
                    StreamEvent::error(BenchError::provider(self.name, "HTTP error 500")),
                ],
                Behaviour::Reply { delay_ms, reported } => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let usage = reported.then_some(TokenUsage {
                        input: 100,
                        output: 50,
                    });
                    vec![
                        StreamEvent::delta(format!("echo {}", request.user_prompt)),
                        StreamEvent::done(usage),
                    ]
                }
            };
            Ok(Box::pin(tokio_stream::iter(events)))
        }

        fn token_count(&self, _input: &str, _output: &str) -> TokenCount {
            TokenCount::new(10, 20)
        }
    }

    struct StaticPrompts(Vec<Prompt>);

    #[async_trait]
    impl PromptSource for StaticPrompts {
        async fn load(&self) -> Result<Vec<Prompt>> {
            Ok(self.0.clone())
        }
    }

    struct FailingPrompts;

    #[async_trait]
    impl PromptSource for FailingPrompts {
        async fn load(&self) -> Result<Vec<Prompt>> {
            Err(BenchError::configuration("prompts", "broken").into())
        }
    }

    fn registry_with(
        providers: Vec<(&'static str, Behaviour, Arc<AtomicUsize>)>,
    ) -> Arc<ProviderRegistry> {
        let registry = ProviderRegistry::new();
        for (name, behaviour, calls) in providers {
            registry.register_constructor(name, move |_| {
                Ok(Arc::new(MockProvider {
                    name,
                    behaviour,
                    calls: calls.clone(),
                }) as Arc<dyn ChatProvider>)
            });
            registry.register_config(name, BackendConfig::default());
        }
        Arc::new(registry)
    }

    fn models(entries: &[(&str, &str, Option<ModelPricing>)]) -> Arc<ModelsConfig> {
        let mut cfg = ModelsConfig::default();
        for (provider, model, pricing) in entries {
            cfg.insert(
                provider,
                model,
                ModelSpec {
                    token_price: *pricing,
                    parameters: None,
                },
            );
        }
        Arc::new(cfg)
    }

    fn prompts(n: usize) -> Arc<dyn PromptSource> {
        Arc::new(StaticPrompts(
            (0..n)
                .map(|i| Prompt::new(format!("p{i}"), None, format!("question {i}")))
                .collect(),
        ))
    }

    fn config(concurrent: usize, runs: usize) -> RunnerConfig {
        RunnerConfig {
            concurrent,
            runs,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn sequential_run_preserves_enumeration_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reply = instant();
        let registry = registry_with(vec![
            ("alpha", reply, calls.clone()),
            ("beta", reply, calls.clone()),
        ]);
        let models = models(&[
            ("alpha", "a1", None),
            ("beta", "b1", None),
            ("beta", "b2", None),
        ]);
        let runner = Runner::new(registry, models, prompts(2), config(1, 2));

        runner.run(CancellationToken::new()).await.unwrap();
        assert_eq!(runner.state(), RunState::Done);

        let results = runner.results();
        assert_eq!(results.len(), 2 * 3 * 2);
        let order: Vec<(String, String, String)> = results
            .iter()
            .map(|r| (r.prompt_name.clone(), r.provider.clone(), r.model.clone()))
            .collect();
        assert_eq!(order[0], ("p0".into(), "alpha".into(), "a1".into()));
        assert_eq!(order[1], ("p0".into(), "alpha".into(), "a1".into()));
        assert_eq!(order[2], ("p0".into(), "beta".into(), "b1".into()));
        assert_eq!(order[4], ("p0".into(), "beta".into(), "b2".into()));
        assert_eq!(order[6], ("p1".into(), "alpha".into(), "a1".into()));
        assert!(results.iter().all(|r| r.success && r.ttft <= r.total_time));
        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn concurrent_run_records_every_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("alpha", reply(5), calls.clone())]);
        let models = models(&[("alpha", "a1", None), ("alpha", "a2", None)]);
        let runner = Runner::new(registry, models, prompts(5), config(4, 2));

        runner.run(CancellationToken::new()).await.unwrap();
        assert_eq!(runner.results().len(), 5 * 2 * 2);
        assert_eq!(runner.summary().successful_runs, 20);
        assert_eq!(runner.state(), RunState::Done);
    }

    #[tokio::test]
    async fn reported_usage_wins_over_estimate_and_drives_cost() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![
            ("reported", reporting(), calls.clone()),
            ("estimated", instant(), calls.clone()),
        ]);
        let price = Some(ModelPricing::new(1.0, 2.0));
        let models = models(&[("reported", "m", price), ("estimated", "m", None)]);
        let runner = Runner::new(registry, models, prompts(1), config(1, 1));
        runner.run(CancellationToken::new()).await.unwrap();

        let results = runner.results();
        let estimated = results.iter().find(|r| r.provider == "estimated").unwrap();
        assert_eq!((estimated.input_tokens, estimated.output_tokens), (10, 20));
        assert_eq!(estimated.cost, 0.0);

        let reported = results.iter().find(|r| r.provider == "reported").unwrap();
        assert_eq!((reported.input_tokens, reported.output_tokens), (100, 50));
        let expected = 100.0 / 1e6 * 1.0 + 50.0 / 1e6 * 2.0;
        assert!((reported.cost - expected).abs() < 1e-12);
        assert_eq!(reported.response, "echo question 0");
    }

    #[tokio::test]
    async fn failures_are_recorded_not_propagated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![
            ("start_fail", Behaviour::FailToStart, calls.clone()),
            ("mid_fail", Behaviour::InBandError, calls.clone()),
            ("silent", Behaviour::Silent, calls.clone()),
        ]);
        let models = models(&[
            ("start_fail", "m", Some(ModelPricing::new(1.0, 1.0))),
            ("mid_fail", "m", None),
            ("silent", "m", None),
        ]);
        let runner = Runner::new(registry, models, prompts(1), config(1, 1));
        runner.run(CancellationToken::new()).await.unwrap();

        let results = runner.results();
        assert_eq!(results.len(), 3);
        for r in results.iter().filter(|r| r.provider != "silent") {
            assert!(!r.success);
            assert!(r.error.is_some());
            assert_eq!(r.cost, 0.0);
            assert_eq!(r.total_time, Duration::ZERO);
        }
        let silent = results.iter().find(|r| r.provider == "silent").unwrap();
        assert!(silent.success);
        assert_eq!(silent.ttft, Duration::ZERO);

        let summary = runner.summary();
        assert_eq!(summary.failed_runs, 2);
        assert!((summary.error_rate - 2.0 / 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn stream_closed_without_terminal_event_is_a_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("cut", Behaviour::Truncated, calls.clone())]);
        let models = models(&[("cut", "m", Some(ModelPricing::new(1.0, 1.0)))]);
        let runner = Runner::new(registry, models, prompts(1), config(1, 1));
        runner.run(CancellationToken::new()).await.unwrap();

        let results = runner.results();
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(matches!(
            &results[0].error,
            Some(BenchError::Provider { provider, .. }) if provider == "cut"
        ));
        assert_eq!(results[0].cost, 0.0);
    }

    #[tokio::test]
    async fn rate_limited_backend_call_is_recorded_as_failed() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let limited = ResponseTemplate::new(429);
        Mock::given(method("POST"))
            .respond_with(limited.insert_header("retry-after", "1e30"))
            .mount(&server)
            .await;

        let registry = ProviderRegistry::with_builtin_backends();
        registry.register_config(
            "openai",
            BackendConfig {
                api_key: Some("sk-test".into()),
                base_url: Some(server.uri()),
                api_version: None,
            },
        );
        let models = models(&[("openai", "gpt-4o-mini", None)]);
        let runner = Runner::new(Arc::new(registry), models, prompts(1), config(1, 1));
        runner.run(CancellationToken::new()).await.unwrap();

        let results = runner.results();
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(matches!(results[0].error, Some(BenchError::RateLimit { .. })));
    }

    #[tokio::test]
    async fn slow_calls_time_out_without_stopping_siblings() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![
            ("slow", reply(2_000), calls.clone()),
            ("fast", instant(), calls.clone()),
        ]);
        let models = models(&[("slow", "m", None), ("fast", "m", None)]);
        let mut cfg = config(2, 1);
        cfg.request_timeout = Duration::from_millis(50);
        let runner = Runner::new(registry, models, prompts(1), cfg);
        runner.run(CancellationToken::new()).await.unwrap();

        let results = runner.results();
        assert_eq!(results.len(), 2);
        let slow = results.iter().find(|r| r.provider == "slow").unwrap();
        assert!(matches!(slow.error, Some(BenchError::Timeout { .. })));
        let fast = results.iter().find(|r| r.provider == "fast").unwrap();
        assert!(fast.success);
    }

    #[tokio::test]
    async fn invalid_requests_fail_without_calling_the_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("alpha", instant(), calls.clone())]);
        let models = models(&[("alpha", "m", None)]);
        let blank = Arc::new(StaticPrompts(vec![Prompt::new("blank", None, "  ")]));
        let runner = Runner::new(registry, models, blank, config(1, 1));
        runner.run(CancellationToken::new()).await.unwrap();

        let results = runner.results();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].error, Some(BenchError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unconstructible_providers_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("alpha", instant(), calls.clone())]);
        let models = models(&[("alpha", "m", None), ("ghost", "m", None)]);
        let runner = Runner::new(registry, models, prompts(1), config(1, 1));
        runner.run(CancellationToken::new()).await.unwrap();

        let results = runner.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].provider, "alpha");
    }

    #[tokio::test]
    async fn prompt_load_failure_aborts_before_any_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("alpha", instant(), calls.clone())]);
        let runner = Runner::new(
            registry,
            models(&[("alpha", "m", None)]),
            Arc::new(FailingPrompts),
            config(2, 1),
        );
        assert!(runner.run(CancellationToken::new()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(runner.results().is_empty());
    }

    #[tokio::test]
    async fn empty_prompt_set_aborts_the_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("alpha", instant(), calls.clone())]);
        let runner = Runner::new(
            registry,
            models(&[("alpha", "m", None)]),
            Arc::new(StaticPrompts(Vec::new())),
            config(1, 1),
        );

        let err = runner.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Bench(BenchError::Configuration { .. })));
        assert_eq!(runner.state(), RunState::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_prompt_dir_aborts_the_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("alpha", instant(), calls.clone())]);
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(
            registry,
            models(&[("alpha", "m", None)]),
            Arc::new(DirPromptSource::new(dir.path())),
            config(1, 1),
        );

        assert!(runner.run(CancellationToken::new()).await.is_err());
        assert!(runner.results().is_empty());
        assert_ne!(runner.state(), RunState::Done);
    }

    #[tokio::test]
    async fn cancelling_concurrent_run_stops_early() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("alpha", reply(50), calls.clone())]);
        let models = models(&[("alpha", "m", None)]);
        let runner = Arc::new(Runner::new(registry, models, prompts(20), config(2, 1)));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), runner.run(cancel))
            .await
            .expect("run should drain after cancellation")
            .unwrap();

        let results = runner.results();
        assert!(results.len() < 20);
        assert_eq!(runner.state(), RunState::Cancelled);
        let cancelled: Vec<_> = results
            .iter()
            .filter(|r| matches!(r.error, Some(BenchError::Cancelled { .. })))
            .collect();
        for r in cancelled {
            assert!(r.response.is_empty() && !r.success);
        }
    }

    #[tokio::test]
    async fn panicking_workers_do_not_hang_the_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("boom", Behaviour::Panic, calls.clone())]);
        let models = models(&[("boom", "m", None)]);
        let runner = Runner::new(registry, models, prompts(20), config(2, 1));

        tokio::time::timeout(Duration::from_secs(5), runner.run(CancellationToken::new()))
            .await
            .expect("run should finish once every worker is gone")
            .unwrap();
        assert!(runner.results().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_sequential_run_starts_no_more_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![("alpha", instant(), calls.clone())]);
        let runner = Runner::new(
            registry,
            models(&[("alpha", "m", None)]),
            prompts(3),
            config(1, 1),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        runner.run(cancel).await.unwrap();
        assert!(runner.results().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(runner.state(), RunState::Cancelled);
    }
}
