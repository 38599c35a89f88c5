//! Environment-backed configuration for the CLI.

use std::path::PathBuf;
use std::sync::Arc;
use webheal_ai::{HybridStepGenerator, LlmClient, StepGenerator, TemplateStepGenerator};

/// Engine-facing settings resolved from the environment.
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub llm_base_url: Option<String>,
    pub artifacts_dir: PathBuf,
}

impl EngineConfig {
    pub fn load() -> Self {
        let artifacts_dir = std::env::var("WEBHEAL_ARTIFACTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("webheal-artifacts"));

        Self {
            api_key: std::env::var("WEBHEAL_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok()
                .filter(|key| !key.trim().is_empty()),
            model: std::env::var("WEBHEAL_MODEL").ok(),
            llm_base_url: std::env::var("WEBHEAL_LLM_BASE_URL").ok(),
            artifacts_dir,
        }
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.artifacts_dir.join("screenshots")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.artifacts_dir.join("logs")
    }

    /// LLM-backed generation when an API key is configured, templates
    /// otherwise.
    pub fn step_generator(&self) -> Arc<dyn StepGenerator> {
        match &self.api_key {
            Some(api_key) => {
                let mut client = LlmClient::new(api_key);
                if let Some(model) = &self.model {
                    client = client.with_model(model);
                }
                if let Some(base_url) = &self.llm_base_url {
                    client = client.with_base_url(base_url);
                }
                Arc::new(HybridStepGenerator::new(client))
            }
            None => Arc::new(TemplateStepGenerator),
        }
    }
}
