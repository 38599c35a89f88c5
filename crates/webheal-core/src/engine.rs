//! The two-level self-healing loop.
//!
//! Inner level: each step gets a bounded number of attempts with a fixed
//! backoff. Outer level: when enough distinct steps fail in one workflow
//! attempt, the attempt is aborted, the plan is regenerated from failure
//! context and the whole workflow is retried in a fresh session.
//!
//! Invariants:
//! - every attempt runs in its own session (`{base}_attempt_{n}`) and that
//!   session is closed on every exit path
//! - one failed step does not abort an attempt; reaching the failure
//!   threshold does
//! - regeneration failure is non-fatal: the previous steps are kept
//! - the returned log holds the final attempt's outcomes only

use crate::context::EngineContext;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info, warn};
use webheal_browser::{ActionExecutor, PageDriver, StepReport};
use webheal_models::{
    ExecutionResult, FailureDigest, Step, StepOutcome, StepStatus, TestPlan, WorkflowRequest,
};

pub struct SelfHealingEngine {
    context: EngineContext,
}

struct AttemptLog {
    outcomes: Vec<StepOutcome>,
    step_failures: u32,
    completed: bool,
}

impl SelfHealingEngine {
    pub fn new(context: EngineContext) -> Self {
        Self { context }
    }

    /// Runs the plan to completion or exhaustion of workflow attempts.
    /// Never returns an error; everything ends up in the [`ExecutionResult`].
    pub async fn run(
        &self,
        request: &WorkflowRequest,
        plan: TestPlan,
        base_session_id: &str,
    ) -> ExecutionResult {
        let policy = self.context.policy.clone();
        let mut steps = plan.steps;
        let mut last_outcomes: Vec<StepOutcome> = Vec::new();

        for attempt in 1..=policy.max_workflow_attempts {
            let session_id = format!("{base_session_id}_attempt_{attempt}");
            let is_final = attempt == policy.max_workflow_attempts;
            info!(attempt, session_id = %session_id, steps = steps.len(), "starting workflow attempt");

            let log = match self.context.sessions.create(&session_id).await {
                Ok(driver) => {
                    let log = self
                        .execute_steps(&session_id, attempt, &steps, driver)
                        .await;
                    self.context.sessions.close(&session_id).await;
                    Some(log)
                }
                Err(err) => {
                    error!(attempt, error = %err, "workflow attempt could not start");
                    self.context.sessions.close(&session_id).await;
                    if is_final {
                        last_outcomes = vec![workflow_error_outcome(attempt, &err.to_string())];
                    }
                    None
                }
            };

            let Some(log) = log else {
                continue;
            };

            let clean = log.outcomes.iter().all(|o| o.status.is_success());
            let success = log.completed && log.step_failures == 0 && clean;
            last_outcomes = log.outcomes;

            if success {
                info!(attempt, "workflow completed");
                return ExecutionResult {
                    success: true,
                    steps_executed: last_outcomes.len(),
                    total_steps: steps.len(),
                    execution_details: last_outcomes,
                    message: format!("Workflow completed successfully on attempt {attempt}"),
                };
            }

            if !is_final {
                let digest = FailureDigest::from_outcomes(&last_outcomes);
                match self.context.generator.regenerate(request, &digest).await {
                    Ok(new_steps) if !new_steps.is_empty() => {
                        info!(
                            attempt,
                            steps = new_steps.len(),
                            "plan regenerated for next attempt"
                        );
                        steps = new_steps;
                    }
                    Ok(_) => {
                        warn!(attempt, "regenerated plan was empty, keeping previous steps");
                    }
                    Err(err) => {
                        warn!(attempt, error = %err, "regeneration failed, keeping previous steps");
                    }
                }
            }
        }

        ExecutionResult {
            success: false,
            steps_executed: last_outcomes.len(),
            total_steps: steps.len(),
            execution_details: last_outcomes,
            message: format!(
                "Workflow failed after {} attempts",
                policy.max_workflow_attempts
            ),
        }
    }

    async fn execute_steps(
        &self,
        session_id: &str,
        attempt: u32,
        steps: &[Step],
        driver: Arc<dyn PageDriver>,
    ) -> AttemptLog {
        let policy = &self.context.policy;
        let recorder = &self.context.screenshots;
        let executor = ActionExecutor::new(driver.clone());

        let mut outcomes = Vec::new();
        let mut step_failures = 0u32;
        let mut completed = true;
        let total = steps.len();

        for (index, step) in steps.iter().enumerate() {
            let step_number = index + 1;
            let mut step = step.clone();
            step.timeout_ms = policy.step_timeout_ms;
            step.retry_count = policy.max_step_attempts;

            for step_attempt in 1..=policy.max_step_attempts {
                let before = recorder
                    .capture(driver.as_ref(), session_id, step_number, "before")
                    .await;
                let report = executor.execute_step(&step).await;
                let after = recorder
                    .capture(driver.as_ref(), session_id, step_number, "after")
                    .await;

                if report.status.is_success() {
                    info!(step = step_number, action = %step.action, step_attempt, "step succeeded");
                    outcomes.push(outcome_from(
                        report,
                        &step,
                        step_number,
                        attempt,
                        step_attempt,
                        before,
                        after,
                        None,
                    ));
                    break;
                }

                warn!(
                    step = step_number,
                    step_attempt,
                    error = %report.message,
                    "step attempt failed"
                );

                if step_attempt < policy.max_step_attempts {
                    sleep(policy.step_retry_delay).await;
                } else {
                    let error_shot = recorder
                        .capture_error(
                            driver.as_ref(),
                            session_id,
                            &format!("step_{step_number}_{}", step.action),
                        )
                        .await;
                    outcomes.push(outcome_from(
                        report,
                        &step,
                        step_number,
                        attempt,
                        step_attempt,
                        before,
                        after,
                        error_shot,
                    ));
                    step_failures += 1;
                }
            }

            if step_failures >= policy.step_failure_threshold {
                error!(attempt, step_failures, "too many step failures, aborting attempt");
                completed = false;
                break;
            }

            if step_number < total {
                sleep(policy.inter_step_delay).await;
            }
        }

        // Final page state for the record.
        recorder
            .capture(driver.as_ref(), session_id, total, "final")
            .await;

        AttemptLog {
            outcomes,
            step_failures,
            completed,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn outcome_from(
    report: StepReport,
    step: &Step,
    step_number: usize,
    workflow_attempt: u32,
    attempts_made: u32,
    screenshot_before: Option<String>,
    screenshot_after: Option<String>,
    error_screenshot: Option<String>,
) -> StepOutcome {
    StepOutcome {
        step_number,
        action: step.action.clone(),
        target: step.target.clone(),
        status: report.status,
        message: report.message,
        timestamp: Utc::now(),
        execution_time_ms: report.execution_time_ms,
        screenshot_before,
        screenshot_after,
        error_screenshot,
        error_details: report.error_details,
        value_verified: report.value_verified,
        ssl_warning_handled: report.ssl_warning_handled,
        attempts_made,
        workflow_attempt,
    }
}

fn workflow_error_outcome(workflow_attempt: u32, message: &str) -> StepOutcome {
    StepOutcome {
        step_number: 0,
        action: "workflow_error".to_string(),
        target: String::new(),
        status: StepStatus::Failed,
        message: message.to_string(),
        timestamp: Utc::now(),
        execution_time_ms: 0,
        screenshot_before: None,
        screenshot_after: None,
        error_screenshot: None,
        error_details: Some(message.to_string()),
        value_verified: None,
        ssl_warning_handled: None,
        attempts_made: 0,
        workflow_attempt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionFactory;
    use crate::policy::RetryPolicy;
    use anyhow::{Result, anyhow, bail};
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use webheal_ai::{AiError, StepGenerator};
    use webheal_browser::{ScreenshotRecorder, WaitUntil};
    use webheal_models::{WorkflowRequest, WorkflowType};

    #[derive(Default)]
    struct ScriptedDriver {
        present: HashSet<String>,
        click_errors: Mutex<VecDeque<String>>,
    }

    impl ScriptedDriver {
        fn with_elements(selectors: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                present: selectors.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            })
        }

        fn queue_click_errors(&self, count: usize, message: &str) {
            let mut errors = self.click_errors.lock().unwrap();
            for _ in 0..count {
                errors.push_back(message.to_string());
            }
        }
    }

    #[async_trait]
    impl PageDriver for ScriptedDriver {
        async fn goto(&self, _url: &str, _wait: WaitUntil, _t: Duration) -> Result<()> {
            Ok(())
        }
        async fn count(&self, selector: &str) -> Result<u64> {
            Ok(u64::from(self.present.contains(selector)))
        }
        async fn wait_visible(&self, _selector: &str, _t: Duration) -> Result<()> {
            Ok(())
        }
        async fn scroll_into_view(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn click(&self, _selector: &str) -> Result<()> {
            if let Some(message) = self.click_errors.lock().unwrap().pop_front() {
                bail!("{message}");
            }
            Ok(())
        }
        async fn is_enabled(&self, _selector: &str) -> Result<bool> {
            Ok(true)
        }
        async fn clear(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn fill(&self, _selector: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn read_value(&self, _selector: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn select_option(&self, _selector: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn content(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn current_url(&self) -> Result<String> {
            Ok("https://example.test/".to_string())
        }
        async fn title(&self) -> Result<String> {
            Ok("Example".to_string())
        }
        async fn screenshot(&self, path: &Path) -> Result<()> {
            std::fs::write(path, b"png")?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        drivers: Mutex<VecDeque<Arc<ScriptedDriver>>>,
        created: Mutex<Vec<String>>,
        closed: Mutex<Vec<String>>,
    }

    impl FakeFactory {
        fn with_drivers(drivers: Vec<Arc<ScriptedDriver>>) -> Arc<Self> {
            Arc::new(Self {
                drivers: Mutex::new(drivers.into()),
                ..Default::default()
            })
        }

        fn created(&self) -> Vec<String> {
            self.created.lock().unwrap().clone()
        }

        fn closed(&self) -> Vec<String> {
            self.closed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn create(&self, id: &str) -> Result<Arc<dyn PageDriver>> {
            self.created.lock().unwrap().push(id.to_string());
            let driver = self.drivers.lock().unwrap().pop_front();
            driver
                .map(|d| d as Arc<dyn PageDriver>)
                .ok_or_else(|| anyhow!("browser runtime unavailable"))
        }

        async fn close(&self, id: &str) {
            self.closed.lock().unwrap().push(id.to_string());
        }
    }

    #[derive(Default)]
    struct FakeGenerator {
        regen_calls: AtomicUsize,
        digests: Mutex<Vec<Vec<FailureDigest>>>,
        next_steps: Mutex<VecDeque<Vec<Step>>>,
    }

    impl FakeGenerator {
        fn with_regenerated(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                next_steps: Mutex::new(VecDeque::from([steps])),
                ..Default::default()
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl StepGenerator for FakeGenerator {
        async fn generate(
            &self,
            _request: &WorkflowRequest,
        ) -> webheal_ai::Result<Vec<Step>> {
            Ok(Vec::new())
        }

        async fn regenerate(
            &self,
            _request: &WorkflowRequest,
            failures: &[FailureDigest],
        ) -> webheal_ai::Result<Vec<Step>> {
            self.regen_calls.fetch_add(1, Ordering::Relaxed);
            self.digests.lock().unwrap().push(failures.to_vec());
            self.next_steps
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AiError::Llm("regeneration unavailable".to_string()))
        }
    }

    fn engine_with(
        factory: Arc<FakeFactory>,
        generator: Arc<FakeGenerator>,
    ) -> (SelfHealingEngine, TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let engine = SelfHealingEngine::new(EngineContext {
            sessions: factory,
            screenshots: Arc::new(ScreenshotRecorder::new(temp.path().to_path_buf())),
            generator,
            policy: RetryPolicy::fast(),
        });
        (engine, temp)
    }

    fn request() -> WorkflowRequest {
        WorkflowRequest::new(WorkflowType::Login)
    }

    fn plan(steps: Vec<Step>) -> TestPlan {
        TestPlan::new("test", "test plan", steps)
    }

    #[tokio::test]
    async fn clean_run_succeeds_on_first_attempt() {
        let driver = ScriptedDriver::with_elements(&["button:has-text('Save')"]);
        let factory = FakeFactory::with_drivers(vec![driver]);
        let generator = FakeGenerator::failing();
        let (engine, _temp) = engine_with(factory.clone(), generator.clone());

        let result = engine
            .run(
                &request(),
                plan(vec![Step::navigate("example.test"), Step::click("Save button")]),
                "run1",
            )
            .await;

        assert!(result.success);
        assert_eq!(result.steps_executed, 2);
        assert_eq!(result.total_steps, 2);
        assert!(result.message.contains("attempt 1"));
        assert!(result.execution_details.iter().all(|o| o.status.is_success()));
        assert!(result.execution_details.iter().all(|o| o.workflow_attempt == 1));
        assert_eq!(factory.created(), vec!["run1_attempt_1"]);
        assert_eq!(factory.closed(), vec!["run1_attempt_1"]);
        assert_eq!(generator.regen_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn flaky_step_heals_within_one_attempt() {
        let driver = ScriptedDriver::with_elements(&["button:has-text('Save')"]);
        driver.queue_click_errors(2, "element detached from dom");
        let factory = FakeFactory::with_drivers(vec![driver]);
        let generator = FakeGenerator::failing();
        let (engine, _temp) = engine_with(factory.clone(), generator.clone());

        let result = engine
            .run(&request(), plan(vec![Step::click("Save button")]), "run2")
            .await;

        assert!(result.success);
        assert_eq!(result.execution_details.len(), 1);
        assert_eq!(result.execution_details[0].attempts_made, 3);
        assert_eq!(generator.regen_calls.load(Ordering::Relaxed), 0);
        assert_eq!(factory.created().len(), 1);
    }

    #[tokio::test]
    async fn clustered_failures_abort_and_regenerate() {
        let first = ScriptedDriver::with_elements(&[]);
        let second = ScriptedDriver::with_elements(&["button:has-text('Save')"]);
        let factory = FakeFactory::with_drivers(vec![first, second]);
        let generator = FakeGenerator::with_regenerated(vec![Step::click("Save button")]);
        let (engine, _temp) = engine_with(factory.clone(), generator.clone());

        let result = engine
            .run(
                &request(),
                plan(vec![
                    Step::click("Ghost one"),
                    Step::click("Ghost two"),
                    Step::click("Never reached"),
                ]),
                "run3",
            )
            .await;

        assert!(result.success);
        assert!(result.message.contains("attempt 2"));
        // Final log holds only the second attempt's outcomes.
        assert_eq!(result.execution_details.len(), 1);
        assert_eq!(result.execution_details[0].workflow_attempt, 2);
        assert_eq!(factory.created(), vec!["run3_attempt_1", "run3_attempt_2"]);
        assert_eq!(factory.closed(), vec!["run3_attempt_1", "run3_attempt_2"]);

        assert_eq!(generator.regen_calls.load(Ordering::Relaxed), 1);
        let digests = generator.digests.lock().unwrap();
        // The third step never ran: the attempt aborted at the threshold.
        assert_eq!(digests[0].len(), 2);
        assert_eq!(digests[0][0].target, "Ghost one");
        assert_eq!(digests[0][1].target, "Ghost two");
    }

    #[tokio::test]
    async fn single_failure_does_not_abort_the_attempt() {
        let drivers = vec![
            ScriptedDriver::with_elements(&["button:has-text('Save')"]),
            ScriptedDriver::with_elements(&["button:has-text('Save')"]),
            ScriptedDriver::with_elements(&["button:has-text('Save')"]),
        ];
        let factory = FakeFactory::with_drivers(drivers);
        let generator = FakeGenerator::failing();
        let (engine, _temp) = engine_with(factory.clone(), generator.clone());

        let result = engine
            .run(
                &request(),
                plan(vec![Step::click("Ghost one"), Step::click("Save button")]),
                "run4",
            )
            .await;

        // One failure is tolerated within the attempt, so the second step
        // still runs; the workflow as a whole fails because every attempt
        // carries that failure.
        assert!(!result.success);
        assert_eq!(result.execution_details.len(), 2);
        assert!(result
            .execution_details
            .iter()
            .all(|o| o.workflow_attempt == 3));
        assert_eq!(result.execution_details[0].status, StepStatus::Failed);
        assert!(result.execution_details[1].status.is_success());
        assert_eq!(generator.regen_calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn exhaustion_reports_failure_with_final_attempt_log() {
        let drivers = vec![
            ScriptedDriver::with_elements(&[]),
            ScriptedDriver::with_elements(&[]),
            ScriptedDriver::with_elements(&[]),
        ];
        let factory = FakeFactory::with_drivers(drivers);
        let generator = FakeGenerator::failing();
        let (engine, _temp) = engine_with(factory.clone(), generator.clone());

        let result = engine
            .run(
                &request(),
                plan(vec![Step::click("Ghost one"), Step::click("Ghost two")]),
                "run5",
            )
            .await;

        assert!(!result.success);
        assert!(result.message.contains("after 3 attempts"));
        assert_eq!(result.execution_details.len(), 2);
        assert!(result
            .execution_details
            .iter()
            .all(|o| o.workflow_attempt == 3));
        // Regeneration failed every time; the original steps were kept.
        assert_eq!(generator.regen_calls.load(Ordering::Relaxed), 2);
        assert_eq!(factory.closed().len(), 3);
    }

    #[tokio::test]
    async fn session_create_failure_yields_synthetic_outcome_on_final_attempt() {
        let factory = FakeFactory::with_drivers(Vec::new());
        let generator = FakeGenerator::failing();
        let (engine, _temp) = engine_with(factory.clone(), generator.clone());

        let result = engine
            .run(&request(), plan(vec![Step::navigate("example.test")]), "run6")
            .await;

        assert!(!result.success);
        assert_eq!(result.execution_details.len(), 1);
        let outcome = &result.execution_details[0];
        assert_eq!(outcome.action, "workflow_error");
        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(outcome.workflow_attempt, 3);
        assert!(outcome.message.contains("browser runtime unavailable"));
        // No steps ran, so regeneration never had failure context.
        assert_eq!(generator.regen_calls.load(Ordering::Relaxed), 0);
        // Close stays idempotent even when create failed.
        assert_eq!(factory.closed().len(), 3);
    }

    #[tokio::test]
    async fn failed_outcomes_never_coexist_with_success() {
        let drivers = vec![
            ScriptedDriver::with_elements(&[]),
            ScriptedDriver::with_elements(&[]),
            ScriptedDriver::with_elements(&[]),
        ];
        let factory = FakeFactory::with_drivers(drivers);
        let generator = FakeGenerator::failing();
        let (engine, _temp) = engine_with(factory, generator);

        let result = engine
            .run(&request(), plan(vec![Step::click("Ghost")]), "run7")
            .await;

        assert!(!result.success);
        assert!(result.failed_outcomes().count() > 0);
    }

    #[tokio::test]
    async fn screenshots_are_attached_to_outcomes() {
        let driver = ScriptedDriver::with_elements(&["button:has-text('Save')"]);
        let factory = FakeFactory::with_drivers(vec![driver]);
        let generator = FakeGenerator::failing();
        let (engine, _temp) = engine_with(factory, generator);

        let result = engine
            .run(&request(), plan(vec![Step::click("Save button")]), "run8")
            .await;

        assert!(result.success);
        let outcome = &result.execution_details[0];
        let before = outcome.screenshot_before.as_deref().unwrap();
        let after = outcome.screenshot_after.as_deref().unwrap();
        assert!(before.contains("run8_attempt_1_step_01_before_"));
        assert!(after.contains("run8_attempt_1_step_01_after_"));
        assert!(Path::new(before).exists());
        assert!(Path::new(after).exists());
        assert!(outcome.error_screenshot.is_none());
    }

    #[tokio::test]
    async fn failed_steps_keep_their_after_screenshot() {
        let drivers = vec![
            ScriptedDriver::with_elements(&[]),
            ScriptedDriver::with_elements(&[]),
            ScriptedDriver::with_elements(&[]),
        ];
        let factory = FakeFactory::with_drivers(drivers);
        let generator = FakeGenerator::failing();
        let (engine, _temp) = engine_with(factory, generator);

        let result = engine
            .run(&request(), plan(vec![Step::click("Ghost")]), "run9")
            .await;

        assert!(!result.success);
        let outcome = &result.execution_details[0];
        assert_eq!(outcome.status, StepStatus::Failed);
        // The page state after the last failed try is kept alongside the
        // error capture.
        let after = outcome.screenshot_after.as_deref().unwrap();
        assert!(after.contains("run9_attempt_3_step_01_after_"));
        assert!(Path::new(after).exists());
        assert!(outcome.error_screenshot.is_some());
    }
}
