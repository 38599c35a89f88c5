//! Subcommand handlers.

use crate::cli::{OutputFormat, RunArgs};
use crate::config::EngineConfig;
use anyhow::{Result, bail};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use webheal_ai::TemplateCatalog;
use webheal_browser::{BrowserConfig, ScreenshotRecorder, SessionManager, probe_runtime};
use webheal_core::{BrowserSessionFactory, EngineContext, RetryPolicy, SelfHealingEngine};
use webheal_models::{ExecutionResult, TestPlan, WorkflowRequest, WorkflowType};

pub async fn run(args: RunArgs, config: &EngineConfig, format: OutputFormat) -> Result<()> {
    let workflow_type = WorkflowType::from_name(&args.workflow);
    if workflow_type == WorkflowType::Unknown {
        bail!(
            "Unknown workflow '{}'. Use `webheal templates` to list the known ones.",
            args.workflow
        );
    }

    let mut request = WorkflowRequest::new(workflow_type)
        .with_param("url", &args.url)
        .with_param("username", &args.username)
        .with_param("password", &args.password);
    for param in &args.params {
        let Some((key, value)) = param.split_once('=') else {
            bail!("Invalid --param '{param}', expected key=value");
        };
        request.parameters.insert(key.to_string(), value.to_string());
    }

    let generator = config.step_generator();
    let steps = generator.generate(&request).await?;
    let plan = TestPlan::new(workflow_type.as_str(), "", steps);

    let manager = Arc::new(SessionManager::new(
        config.artifacts_dir.join("sessions"),
        BrowserConfig {
            headless: args.headless,
            ..BrowserConfig::default()
        },
    )?);
    let engine = SelfHealingEngine::new(EngineContext {
        sessions: Arc::new(BrowserSessionFactory::new(manager.clone())),
        screenshots: Arc::new(ScreenshotRecorder::new(config.screenshots_dir())),
        generator,
        policy: RetryPolicy::default(),
    });

    let base_session_id = args
        .session
        .unwrap_or_else(|| format!("{}_{}", workflow_type, Uuid::new_v4().simple()));
    info!(workflow = %workflow_type, session = %base_session_id, "starting workflow run");

    let result = engine.run(&request, plan, &base_session_id).await;
    manager.cleanup().await;

    print_result(&result, format)?;
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_result(result: &ExecutionResult, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{}", result.message);
    println!(
        "Steps: {}/{} recorded, success: {}",
        result.steps_executed, result.total_steps, result.success
    );
    for outcome in &result.execution_details {
        let status = if outcome.status.is_success() { "ok" } else { "FAILED" };
        println!(
            "  [{status}] step {} {} {} ({} ms, {} tries): {}",
            outcome.step_number,
            outcome.action,
            outcome.target,
            outcome.execution_time_ms,
            outcome.attempts_made,
            outcome.message
        );
    }
    Ok(())
}

pub fn templates(format: OutputFormat) -> Result<()> {
    let templates = TemplateCatalog::list();

    if format.is_json() {
        let listing: Vec<serde_json::Value> = templates
            .iter()
            .map(|info| {
                serde_json::json!({
                    "name": info.name,
                    "description": info.description,
                    "required_params": info.required_params,
                    "defaults": info.defaults.iter()
                        .map(|(k, v)| serde_json::json!({ "name": k, "value": v }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    for info in templates {
        println!("{} - {}", info.name, info.description);
        println!("  required: {}", info.required_params.join(", "));
        if !info.defaults.is_empty() {
            let defaults: Vec<String> = info
                .defaults
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            println!("  defaults: {}", defaults.join(", "));
        }
    }
    Ok(())
}

pub async fn probe(format: OutputFormat) -> Result<()> {
    let probe = probe_runtime().await?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&probe)?);
        return Ok(());
    }

    println!("node available:       {}", probe.node_available);
    if let Some(version) = &probe.node_version {
        println!("node version:         {version}");
    }
    println!("playwright available: {}", probe.playwright_package_available);
    println!("chromium cache:       {}", probe.chromium_cache_detected);
    println!("ready:                {}", probe.ready);
    for note in &probe.notes {
        println!("note: {note}");
    }
    if !probe.ready {
        std::process::exit(1);
    }
    Ok(())
}
