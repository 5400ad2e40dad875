pub mod models;
pub mod prompts;
pub mod settings;

pub use models::{ModelPricing, ModelSpec, ModelsConfig};
pub use prompts::{DirPromptSource, Prompt, PromptSource};
pub use settings::{BackendConfig, Settings};
