use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::ChatProvider;
use crate::config::BackendConfig;
use crate::error::BenchError;

/// 根据后端配置构造 Provider 实例的工厂函数
pub type ProviderConstructor =
    Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn ChatProvider>, BenchError> + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    constructors: HashMap<String, ProviderConstructor>,
    configs: HashMap<String, BackendConfig>,
    instances: HashMap<String, Arc<dyn ChatProvider>>,
}

/// 按名称登记的后端注册表：
/// - 构造器与配置分别登记，实例在首次使用时惰性创建并缓存
/// - 线程安全，可在 worker 之间共享
#[derive(Default)]
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend constructor, and no configs yet.
    pub fn with_builtin_backends() -> Self {
        let registry = Self::new();
        registry.register_constructor("openai", |cfg| {
            Ok(Arc::new(super::OpenAIProvider::new(cfg)?) as Arc<dyn ChatProvider>)
        });
        registry.register_constructor("openai_responses", |cfg| {
            Ok(Arc::new(super::OpenAIResponsesProvider::new(cfg)?) as Arc<dyn ChatProvider>)
        });
        registry.register_constructor("groq", |cfg| {
            Ok(Arc::new(super::GroqProvider::new(cfg)?) as Arc<dyn ChatProvider>)
        });
        registry.register_constructor("anthropic", |cfg| {
            Ok(Arc::new(super::AnthropicProvider::new(cfg)?) as Arc<dyn ChatProvider>)
        });
        registry.register_constructor("azure_openai", |cfg| {
            Ok(Arc::new(super::AzureOpenAIProvider::new(cfg)?) as Arc<dyn ChatProvider>)
        });
        registry.register_constructor("gemini", |cfg| {
            Ok(Arc::new(super::GeminiProvider::new(cfg)?) as Arc<dyn ChatProvider>)
        });
        registry
    }

    pub fn register_constructor<F>(&self, name: &str, constructor: F)
    where
        F: Fn(&BackendConfig) -> Result<Arc<dyn ChatProvider>, BenchError> + Send + Sync + 'static,
    {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .constructors
            .insert(name.to_string(), Arc::new(constructor));
        state.instances.remove(name);
    }

    /// Overwrites unconditionally. A cached instance keeps its old config until
    /// [`clear_providers`](Self::clear_providers).
    pub fn register_config(&self, name: &str, config: BackendConfig) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.configs.insert(name.to_string(), config);
    }

    pub fn get_provider(&self, name: &str) -> Result<Arc<dyn ChatProvider>, BenchError> {
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if let Some(p) = state.instances.get(name) {
                return Ok(p.clone());
            }
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        // another caller may have built it while we waited for the write lock
        if let Some(p) = state.instances.get(name) {
            return Ok(p.clone());
        }

        let constructor = state.constructors.get(name).cloned().ok_or_else(|| {
            BenchError::configuration(name, format!("unknown provider backend `{name}`"))
        })?;
        let config = state.configs.get(name).ok_or_else(|| {
            BenchError::configuration(name, "no configuration registered")
        })?;

        let provider = constructor(config)?;
        tracing::debug!(provider = %name, "constructed provider");
        state.instances.insert(name.to_string(), provider.clone());
        Ok(provider)
    }

    /// Drops constructed instances; configs and constructors stay.
    pub fn clear_providers(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.instances.clear();
    }

    pub fn available_providers(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = state.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatRequest, EventStream, StreamEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Named(String);

    #[async_trait]
    impl ChatProvider for Named {
        fn name(&self) -> &str {
            &self.0
        }

        async fn stream_chat(
            &self,
            _request: &ChatRequest,
            _cancel: CancellationToken,
        ) -> Result<EventStream, BenchError> {
            Ok(Box::pin(tokio_stream::iter(vec![StreamEvent::done(None)])))
        }
    }

    fn counting_registry(built: Arc<AtomicUsize>) -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        registry.register_constructor("mock", move |cfg| {
            cfg.require_api_key("mock")?;
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Named("mock".into())) as Arc<dyn ChatProvider>)
        });
        registry
    }

    #[test]
    fn instances_are_memoized_until_cleared() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(built.clone());
        registry.register_config("mock", BackendConfig::with_api_key("k"));

        let a = registry.get_provider("mock").unwrap();
        let b = registry.get_provider("mock").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        registry.clear_providers();
        let c = registry.get_provider("mock").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn construction_failures_are_not_cached() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(built.clone());
        registry.register_config("mock", BackendConfig::default());

        let err = registry.get_provider("mock").err().unwrap();
        assert_eq!(err.kind(), "configuration");

        registry.register_config("mock", BackendConfig::with_api_key("k"));
        assert!(registry.get_provider("mock").is_ok());
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_and_unconfigured_backends_are_configuration_errors() {
        let registry = ProviderRegistry::with_builtin_backends();
        assert!(matches!(
            registry.get_provider("nope"),
            Err(BenchError::Configuration { .. })
        ));
        assert!(matches!(
            registry.get_provider("openai"),
            Err(BenchError::Configuration { .. })
        ));
        assert_eq!(
            registry.available_providers(),
            vec![
                "anthropic",
                "azure_openai",
                "gemini",
                "groq",
                "openai",
                "openai_responses"
            ]
        );
    }

    #[test]
    fn concurrent_lookups_build_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(counting_registry(built.clone()));
        registry.register_config("mock", BackendConfig::with_api_key("k"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = registry.clone();
                std::thread::spawn(move || r.get_provider("mock").map(|p| p.name().to_string()))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().unwrap(), "mock");
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
