//! Shared data model for the webheal workflow engine.
//!
//! These types form the contracts between the step generator, the
//! browser action executor and the self-healing engine:
//! - [`Step`] / [`TestPlan`]: what to execute
//! - [`StepOutcome`] / [`ExecutionResult`]: what happened
//! - [`FailureDigest`]: failure context handed back to the generator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_STEP_RETRIES: u32 = 3;

/// The six known step actions.
///
/// Steps carry their action as a raw string on the wire; unknown values are
/// rejected at the executor boundary with a failed outcome instead of an
/// error, so this enum intentionally has no catch-all variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Navigate,
    Click,
    Fill,
    Verify,
    Wait,
    Select,
}

impl StepAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "navigate" => Some(Self::Navigate),
            "click" => Some(Self::Click),
            "fill" => Some(Self::Fill),
            "verify" => Some(Self::Verify),
            "wait" => Some(Self::Wait),
            "select" => Some(Self::Select),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Click => "click",
            Self::Fill => "fill",
            Self::Verify => "verify",
            Self::Wait => "wait",
            Self::Select => "select",
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the element resolver should look up a step's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    #[default]
    Auto,
    Id,
    Class,
    Text,
    Xpath,
    Css,
}

impl LocatorStrategy {
    /// Unknown strategy names fall back to `Auto`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "id" => Self::Id,
            "class" => Self::Class,
            "text" => Self::Text,
            "xpath" => Self::Xpath,
            "css" => Self::Css,
            _ => Self::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Id => "id",
            Self::Class => "class",
            Self::Text => "text",
            Self::Xpath => "xpath",
            Self::Css => "css",
        }
    }
}

/// One atomic UI action.
///
/// `action` stays a raw string so that plans produced by an LLM with an
/// unexpected action kind still deserialize and can be reported as a failed
/// outcome naming the unknown action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    pub target: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub locator_strategy: LocatorStrategy,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

fn default_retry_count() -> u32 {
    DEFAULT_STEP_RETRIES
}

impl Step {
    pub fn new(action: StepAction, target: impl Into<String>) -> Self {
        Self {
            action: action.as_str().to_string(),
            target: target.into(),
            value: String::new(),
            description: String::new(),
            locator_strategy: LocatorStrategy::Auto,
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            retry_count: DEFAULT_STEP_RETRIES,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_strategy(mut self, strategy: LocatorStrategy) -> Self {
        self.locator_strategy = strategy;
        self
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(StepAction::Navigate, url)
    }

    pub fn click(target: impl Into<String>) -> Self {
        Self::new(StepAction::Click, target)
    }

    pub fn fill(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(StepAction::Fill, target).with_value(value)
    }

    pub fn verify(target: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::new(StepAction::Verify, target).with_value(expected)
    }

    pub fn wait(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(StepAction::Wait, target).with_value(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// The record produced for every step-attempt that gets retained in the
/// execution log. Screenshot fields hold file paths when capture succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_number: usize,
    pub action: String,
    pub target: String,
    pub status: StepStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_warning_handled: Option<bool>,
    pub attempts_made: u32,
    pub workflow_attempt: u32,
}

/// An ordered step sequence plus descriptive metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl TestPlan {
    pub fn new(name: impl Into<String>, description: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps,
        }
    }
}

/// Final artifact of a workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub steps_executed: usize,
    pub total_steps: usize,
    pub execution_details: Vec<StepOutcome>,
    pub message: String,
}

impl ExecutionResult {
    pub fn failed_outcomes(&self) -> impl Iterator<Item = &StepOutcome> {
        self.execution_details
            .iter()
            .filter(|o| o.status == StepStatus::Failed)
    }
}

/// Failure context handed to the step generator for regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDigest {
    pub step_number: usize,
    pub action: String,
    pub target: String,
    pub message: String,
}

impl FailureDigest {
    pub fn from_outcomes(outcomes: &[StepOutcome]) -> Vec<Self> {
        outcomes
            .iter()
            .filter(|o| o.status == StepStatus::Failed)
            .map(|o| Self {
                step_number: o.step_number,
                action: o.action.clone(),
                target: o.target.clone(),
                message: o.message.clone(),
            })
            .collect()
    }
}

/// Workflow kinds known to the template catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Login,
    NetworkHierarchy,
    Unknown,
}

impl WorkflowType {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "login" | "dna_center_login" => Self::Login,
            "network_hierarchy" | "network_site_hierarchy" => Self::NetworkHierarchy,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::NetworkHierarchy => "network_hierarchy",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input contract of the step generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl WorkflowRequest {
    pub fn new(workflow_type: WorkflowType) -> Self {
        Self {
            workflow_type,
            parameters: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}
