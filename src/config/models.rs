use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// 每百万 token 的价格
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
}

impl ModelPricing {
    pub fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input
            + (output_tokens as f64 / 1_000_000.0) * self.output
    }
}

/// 单个模型的定价与默认请求参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(default)]
    pub token_price: Option<ModelPricing>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

// `gpt-4o:` with nothing under it is a valid entry, so both levels tolerate null.
type RawModels = BTreeMap<String, Option<BTreeMap<String, Option<ModelSpec>>>>;

/// `models.yaml` 的内容：provider -> model -> 定价与参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelsConfig {
    providers: BTreeMap<String, BTreeMap<String, ModelSpec>>,
}

impl ModelsConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content).map_err(|source| AppError::Yaml {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml_str(content: &str) -> std::result::Result<Self, serde_yml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Option<RawModels> = serde_yml::from_str(content)?;
        let providers = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(provider, models)| {
                let models = models
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(model, spec)| (model, spec.unwrap_or_default()))
                    .collect();
                (provider, models)
            })
            .collect();
        Ok(Self { providers })
    }

    pub fn insert(&mut self, provider: &str, model: &str, spec: ModelSpec) {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .insert(model.to_string(), spec);
    }

    pub fn is_empty(&self) -> bool {
        self.providers.values().all(|m| m.is_empty())
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn models_for(&self, provider: &str) -> Vec<String> {
        self.providers
            .get(provider)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn spec(&self, provider: &str, model: &str) -> Option<&ModelSpec> {
        self.providers.get(provider)?.get(model)
    }

    pub fn pricing(&self, provider: &str, model: &str) -> Option<ModelPricing> {
        self.spec(provider, model)?.token_price
    }

    pub fn parameters(&self, provider: &str, model: &str) -> Option<&Map<String, Value>> {
        self.spec(provider, model)?.parameters.as_ref()
    }
}
