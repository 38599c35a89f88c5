//! Step generation for webheal.
//!
//! Plans come from two sources: a static workflow template catalog, and an
//! OpenAI-compatible LLM that can also regenerate a plan from failure
//! context when the engine asks for self-healing.

pub mod error;
pub mod generator;
pub mod llm;
pub mod templates;

pub use error::{AiError, Result};
pub use generator::{HybridStepGenerator, StepGenerator, TemplateStepGenerator, extract_plan};
pub use llm::{LlmClient, LlmRetryConfig};
pub use templates::{TemplateCatalog, TemplateInfo};
