use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::{AppError, BenchError, Result};

/// 一个提示词文件: 可选的 system 与必填的 user。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prompt {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub user: String,
}

impl Prompt {
    pub fn new(name: impl Into<String>, system: Option<&str>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system: system.map(str::to_string),
            user: user.into(),
        }
    }
}

/// 提示词来源，每次运行开始时加载一次
#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Prompt>>;
}

/// 目录提示词来源：递归收集目录下的所有提示词文件
#[derive(Debug, Clone)]
pub struct DirPromptSource {
    dir: PathBuf,
}

impl DirPromptSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PromptSource for DirPromptSource {
    async fn load(&self) -> Result<Vec<Prompt>> {
        load_prompts_from_dir(&self.dir)
    }
}

fn is_prompt_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

/// 递归加载 `dir` 下所有 `*.yaml` / `*.yml`（含子目录），按路径排序。
/// 一个提示词都没有找到时返回配置错误。
pub fn load_prompts_from_dir(dir: &Path) -> Result<Vec<Prompt>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && is_prompt_file(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    let prompts = paths
        .iter()
        .map(|p| load_prompt_file(p))
        .collect::<Result<Vec<_>>>()?;
    if prompts.is_empty() {
        return Err(AppError::Bench(BenchError::configuration(
            "prompts_dir",
            format!("no valid prompt files found in {}", dir.display()),
        )));
    }
    Ok(prompts)
}

pub fn load_prompt_file(path: &Path) -> Result<Prompt> {
    let content = std::fs::read_to_string(path)?;
    let mut prompt: Prompt = serde_yml::from_str(&content).map_err(|source| AppError::Yaml {
        path: path.display().to_string(),
        source,
    })?;

    if prompt.user.trim().is_empty() {
        return Err(AppError::Bench(BenchError::validation(
            "user",
            format!("prompt {} has an empty user message", path.display()),
        )));
    }

    prompt.name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    Ok(prompt)
}
