//! Static workflow templates with `{param}` substitution.
//!
//! Templates are the non-LLM plan source: each known workflow type maps to a
//! fixed step sequence whose targets and values carry `{param}` placeholders.
//! Required parameters must be supplied by the caller; optional ones have
//! defaults.

use crate::error::{AiError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;
use webheal_models::{Step, TestPlan, WorkflowRequest, WorkflowType};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("valid placeholder pattern")
});

/// Template metadata for listings.
#[derive(Debug, Clone)]
pub struct TemplateInfo {
    pub workflow_type: WorkflowType,
    pub name: &'static str,
    pub description: &'static str,
    pub required_params: &'static [&'static str],
    pub defaults: &'static [(&'static str, &'static str)],
}

const LOGIN_REQUIRED: &[&str] = &["url", "username", "password"];
const LOGIN_DEFAULTS: &[(&str, &str)] = &[];

const HIERARCHY_REQUIRED: &[&str] = &["url", "username", "password"];
const HIERARCHY_DEFAULTS: &[(&str, &str)] = &[
    ("area_name", "SJC"),
    ("building_name", "B1"),
    ("address_search", "San Jose"),
];

pub struct TemplateCatalog;

impl TemplateCatalog {
    pub fn list() -> Vec<TemplateInfo> {
        vec![
            TemplateInfo {
                workflow_type: WorkflowType::Login,
                name: "login",
                description: "Log in to the controller UI and verify the dashboard loads",
                required_params: LOGIN_REQUIRED,
                defaults: LOGIN_DEFAULTS,
            },
            TemplateInfo {
                workflow_type: WorkflowType::NetworkHierarchy,
                name: "network_hierarchy",
                description: "Log in and create an area and a building under the network hierarchy",
                required_params: HIERARCHY_REQUIRED,
                defaults: HIERARCHY_DEFAULTS,
            },
        ]
    }

    /// Builds a concrete plan for the request, or errors if the workflow is
    /// unknown or a required parameter is missing.
    pub fn generate(request: &WorkflowRequest) -> Result<TestPlan> {
        let (info, steps) = match request.workflow_type {
            WorkflowType::Login => (Self::info(WorkflowType::Login)?, login_steps()),
            WorkflowType::NetworkHierarchy => (
                Self::info(WorkflowType::NetworkHierarchy)?,
                network_hierarchy_steps(),
            ),
            WorkflowType::Unknown => {
                return Err(AiError::UnknownWorkflow("unknown".to_string()));
            }
        };

        let mut params: HashMap<String, String> = info
            .defaults
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        params.extend(request.parameters.clone());

        for required in info.required_params {
            if params.get(*required).is_none_or(|v| v.trim().is_empty()) {
                return Err(AiError::MissingParameter(required.to_string()));
            }
        }

        let steps = steps
            .into_iter()
            .map(|step| substitute_step(step, &params))
            .collect::<Result<Vec<Step>>>()?;

        debug!(workflow = %info.name, steps = steps.len(), "template plan generated");
        Ok(TestPlan::new(info.name, info.description, steps))
    }

    fn info(workflow_type: WorkflowType) -> Result<TemplateInfo> {
        Self::list()
            .into_iter()
            .find(|info| info.workflow_type == workflow_type)
            .ok_or_else(|| AiError::UnknownWorkflow(workflow_type.to_string()))
    }
}

fn login_steps() -> Vec<Step> {
    vec![
        Step::navigate("{url}").with_description("Open the controller login page"),
        Step::fill("username field", "{username}").with_description("Enter the username"),
        Step::fill("password field", "{password}").with_description("Enter the password"),
        Step::click("Login button").with_description("Submit the login form"),
        Step::wait("time", "3").with_description("Let the post-login redirect settle"),
        Step::verify("page", "dashboard").with_description("Confirm the dashboard loaded"),
    ]
}

fn network_hierarchy_steps() -> Vec<Step> {
    let mut steps = login_steps();
    steps.extend(vec![
        Step::navigate("{url}/dna/design/network-hierarchy")
            .with_description("Open the network hierarchy page"),
        Step::wait("Add Site button", "").with_description("Wait for the hierarchy tree"),
        Step::click("Add Site button").with_description("Open the add-site menu"),
        Step::click("Add Area button").with_description("Choose to add an area"),
        Step::fill("Area Name field", "{area_name}").with_description("Name the new area"),
        Step::click("Add button").with_description("Create the area"),
        Step::click("Add Site button").with_description("Open the add-site menu again"),
        Step::click("Add Building button").with_description("Choose to add a building"),
        Step::fill("Building Name field", "{building_name}")
            .with_description("Name the new building"),
        Step::fill("Address field", "{address_search}")
            .with_description("Search for the building address"),
        Step::wait("time", "2").with_description("Let the address suggestions load"),
        Step::click("Add button").with_description("Create the building"),
        Step::verify("page", "{building_name}").with_description("Confirm the building exists"),
    ]);
    steps
}

pub(crate) fn substitute_step(mut step: Step, params: &HashMap<String, String>) -> Result<Step> {
    step.target = substitute(&step.target, params)?;
    step.value = substitute(&step.value, params)?;
    Ok(step)
}

fn substitute(text: &str, params: &HashMap<String, String>) -> Result<String> {
    let mut out = text.to_string();
    for (key, value) in params {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    if let Some(capture) = PLACEHOLDER.captures(&out)
        && let Some(name) = capture.get(1)
    {
        return Err(AiError::MissingParameter(name.as_str().to_string()));
    }
    Ok(out)
}
