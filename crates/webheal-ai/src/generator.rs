//! Plan generation and regeneration.
//!
//! [`StepGenerator`] is the seam the engine depends on. Two implementations:
//! - [`TemplateStepGenerator`]: templates only; regeneration is unavailable
//! - [`HybridStepGenerator`]: LLM-first with template fallback, and
//!   failure-context regeneration through the LLM
//!
//! Prompts never carry password values; the LLM echoes `{password}`-style
//! placeholders back and they are substituted locally after parsing.

use crate::error::{AiError, Result};
use crate::llm::LlmClient;
use crate::templates::{TemplateCatalog, substitute_step};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};
use webheal_models::{FailureDigest, Step, TestPlan, WorkflowRequest};

const SYSTEM_PROMPT: &str = "You are a UI test automation expert. \
Respond with a single JSON object of the form \
{\"name\": string, \"description\": string, \"steps\": [{\"action\": string, \
\"target\": string, \"value\": string, \"description\": string}]}. \
Allowed actions: navigate, click, fill, verify, wait, select. \
Targets are plain-language element descriptions, e.g. \"username field\" or \
\"Save button\". Keep placeholders like {password} exactly as written. \
Respond with JSON only, no prose.";

#[async_trait]
pub trait StepGenerator: Send + Sync {
    async fn generate(&self, request: &WorkflowRequest) -> Result<Vec<Step>>;

    async fn regenerate(
        &self,
        request: &WorkflowRequest,
        failures: &[FailureDigest],
    ) -> Result<Vec<Step>>;
}

/// Template-only generation. Used when no LLM is configured.
pub struct TemplateStepGenerator;

#[async_trait]
impl StepGenerator for TemplateStepGenerator {
    async fn generate(&self, request: &WorkflowRequest) -> Result<Vec<Step>> {
        Ok(TemplateCatalog::generate(request)?.steps)
    }

    async fn regenerate(
        &self,
        _request: &WorkflowRequest,
        _failures: &[FailureDigest],
    ) -> Result<Vec<Step>> {
        Err(AiError::Llm("no LLM configured for regeneration".to_string()))
    }
}

/// LLM-backed generation with template fallback.
pub struct HybridStepGenerator {
    llm: LlmClient,
}

impl HybridStepGenerator {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    async fn generate_via_llm(&self, request: &WorkflowRequest) -> Result<Vec<Step>> {
        let user = format!(
            "Produce a test plan for the '{}' workflow.\nParameters:\n{}",
            request.workflow_type,
            render_parameters(request)
        );
        let text = self.llm.complete(SYSTEM_PROMPT, &user).await?;
        let plan = extract_plan(&text)?;
        finalize_steps(plan.steps, &request.parameters)
    }
}

#[async_trait]
impl StepGenerator for HybridStepGenerator {
    async fn generate(&self, request: &WorkflowRequest) -> Result<Vec<Step>> {
        match self.generate_via_llm(request).await {
            Ok(steps) => {
                info!(workflow = %request.workflow_type, steps = steps.len(), "plan generated via LLM");
                Ok(steps)
            }
            Err(err) => {
                warn!(workflow = %request.workflow_type, error = %err, "LLM generation failed, using template");
                Ok(TemplateCatalog::generate(request)?.steps)
            }
        }
    }

    async fn regenerate(
        &self,
        request: &WorkflowRequest,
        failures: &[FailureDigest],
    ) -> Result<Vec<Step>> {
        let mut context = String::new();
        for failure in failures {
            context.push_str(&format!(
                "- Step {} ({} on '{}'): {}\n",
                failure.step_number, failure.action, failure.target, failure.message
            ));
        }

        let user = format!(
            "The previous plan for the '{}' workflow failed. Failures:\n{}\n\
             Parameters:\n{}\n\
             Produce a corrected, complete test plan that works around these \
             failures (different element descriptions, extra waits, or a \
             different approach).",
            request.workflow_type,
            context,
            render_parameters(request)
        );

        let text = self.llm.complete(SYSTEM_PROMPT, &user).await?;
        let plan = extract_plan(&text)?;
        let steps = finalize_steps(plan.steps, &request.parameters)?;
        info!(workflow = %request.workflow_type, steps = steps.len(), "plan regenerated via LLM");
        Ok(steps)
    }
}

fn render_parameters(request: &WorkflowRequest) -> String {
    let mut keys: Vec<&String> = request.parameters.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| {
            // Secrets travel as placeholders, never as prompt text.
            if key.contains("password") {
                format!("- {key}: {{{key}}}")
            } else {
                format!(
                    "- {key}: {}",
                    request.parameters.get(key).map(String::as_str).unwrap_or("")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn finalize_steps(steps: Vec<Step>, params: &HashMap<String, String>) -> Result<Vec<Step>> {
    if steps.is_empty() {
        return Err(AiError::InvalidFormat("plan has no steps".to_string()));
    }
    steps
        .into_iter()
        .map(|step| substitute_step(step, params))
        .collect()
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(alias = "test_name")]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    steps: Vec<Step>,
}

/// Parses an LLM reply into a plan: strip code fences first, then fall back
/// to the outermost JSON object if the reply carries surrounding prose.
pub fn extract_plan(text: &str) -> Result<TestPlan> {
    let candidate = strip_fences(text);

    let raw: RawPlan = match serde_json::from_str(candidate) {
        Ok(raw) => raw,
        Err(first_err) => {
            let start = candidate.find('{');
            let end = candidate.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&candidate[start..=end]).map_err(|_| {
                        AiError::InvalidFormat(format!("unparseable plan JSON: {first_err}"))
                    })?
                }
                _ => {
                    return Err(AiError::InvalidFormat(format!(
                        "no JSON object in reply: {first_err}"
                    )));
                }
            }
        }
    };

    if raw.steps.is_empty() {
        return Err(AiError::InvalidFormat("plan has no steps".to_string()));
    }
    Ok(TestPlan::new(raw.name, raw.description, raw.steps))
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    for fence in ["```json", "```"] {
        if let Some(rest) = trimmed.strip_prefix(fence)
            && let Some(end) = rest.rfind("```")
        {
            return rest[..end].trim();
        }
    }
    trimmed
}
