//! Single-step execution against a live page.
//!
//! `execute_step` is a never-throws boundary: whatever the browser does, the
//! caller gets a [`StepReport`], never an `Err`. Failure text keeps the raw
//! driver message in `error_details` so the engine can log it verbatim.

use crate::driver::{PageDriver, WaitUntil};
use crate::resolver;
use anyhow::{Result, anyhow, bail};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};
use webheal_models::{Step, StepAction, StepStatus};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(45);
const RELAXED_RETRY_DELAY: Duration = Duration::from_secs(2);
const ENABLED_CHECK_ATTEMPTS: u32 = 3;
const ENABLED_CHECK_DELAY: Duration = Duration::from_secs(1);
const VERIFY_ATTEMPTS: u32 = 3;
const VERIFY_DELAY: Duration = Duration::from_secs(1);
const WAIT_ATTEMPTS: u32 = 3;
const WAIT_DELAY: Duration = Duration::from_secs(2);
const WAIT_VISIBLE_TIMEOUT: Duration = Duration::from_secs(5);

const SSL_KEYWORDS: &[&str] = &["ssl", "certificate", "tls", "handshake", "cert", "x509"];
const NETWORK_KEYWORDS: &[&str] = &["net::", "timeout", "connection", "refused"];

const SSL_WARNING_TEXTS: &[&str] = &[
    "not private",
    "certificate error",
    "your connection is not",
    "proceed to",
];

const PROCEED_SELECTORS: &[&str] = &[
    "#proceed-link",
    "#details-button",
    "button:has-text('Advanced')",
    "button:has-text('Proceed')",
    "button:has-text('Continue')",
];

/// What one step-attempt produced. Always returned, even on failure.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub status: StepStatus,
    pub message: String,
    pub error_details: Option<String>,
    pub value_verified: Option<bool>,
    pub ssl_warning_handled: Option<bool>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Default)]
struct ActionOutput {
    message: String,
    value_verified: Option<bool>,
    ssl_warning_handled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NavFailure {
    Ssl,
    Network,
    Other,
}

impl NavFailure {
    fn classify(error_text: &str) -> Self {
        let lower = error_text.to_lowercase();
        if SSL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            Self::Ssl
        } else if NETWORK_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            Self::Network
        } else {
            Self::Other
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Ssl => "ssl",
            Self::Network => "network",
            Self::Other => "navigation",
        }
    }
}

/// Executes one [`Step`] at a time against its page.
pub struct ActionExecutor {
    driver: Arc<dyn PageDriver>,
}

impl ActionExecutor {
    pub fn new(driver: Arc<dyn PageDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<dyn PageDriver> {
        &self.driver
    }

    pub async fn execute_step(&self, step: &Step) -> StepReport {
        let started = Instant::now();

        let outcome = match StepAction::parse(&step.action) {
            Some(StepAction::Navigate) => self.navigate(step).await,
            Some(StepAction::Click) => self.click(step).await,
            Some(StepAction::Fill) => self.fill(step).await,
            Some(StepAction::Verify) => self.verify(step).await,
            Some(StepAction::Wait) => self.wait(step).await,
            Some(StepAction::Select) => self.select(step).await,
            None => Err(anyhow!("Unknown action: {}", step.action)),
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => StepReport {
                status: StepStatus::Success,
                message: output.message,
                error_details: None,
                value_verified: output.value_verified,
                ssl_warning_handled: output.ssl_warning_handled,
                execution_time_ms,
            },
            Err(err) => StepReport {
                status: StepStatus::Failed,
                message: err.to_string(),
                error_details: Some(format!("{err:#}")),
                value_verified: None,
                ssl_warning_handled: None,
                execution_time_ms,
            },
        }
    }

    /// Strict load first, then one relaxed retry for SSL and network
    /// failures. Anything else is non-recoverable and fails immediately.
    async fn navigate(&self, step: &Step) -> Result<ActionOutput> {
        let url = normalize_url(&step.target);

        if let Err(err) = self
            .driver
            .goto(&url, WaitUntil::DomContentLoaded, NAVIGATION_TIMEOUT)
            .await
        {
            let failure = NavFailure::classify(&err.to_string());
            if failure == NavFailure::Other {
                return Err(err.context(format!("Navigation to {url} failed")));
            }
            warn!(
                url = %url,
                kind = failure.label(),
                error = %err,
                "navigation failed, retrying with relaxed wait"
            );
            sleep(RELAXED_RETRY_DELAY).await;
            self.driver
                .goto(&url, WaitUntil::Commit, NAVIGATION_TIMEOUT)
                .await
                .map_err(|retry_err| {
                    anyhow!(
                        "Navigation to {url} failed ({} error): {retry_err}",
                        failure.label()
                    )
                })?;
        }

        let ssl_warning_handled = self.handle_ssl_warning_page().await;

        Ok(ActionOutput {
            message: format!("Navigated to {url}"),
            ssl_warning_handled,
            ..Default::default()
        })
    }

    /// Some targets present an interstitial warning instead of the page.
    /// Detection and the proceed click are both best-effort.
    async fn handle_ssl_warning_page(&self) -> Option<bool> {
        let content = match self.driver.content().await {
            Ok(content) => content.to_lowercase(),
            Err(err) => {
                debug!(error = %err, "could not read page content for ssl warning check");
                return None;
            }
        };
        if !SSL_WARNING_TEXTS.iter().any(|text| content.contains(text)) {
            return None;
        }

        // The page loaded despite the warning, so the navigation is accepted
        // and flagged as handled whether or not a proceed link exists.
        warn!("ssl warning page detected, attempting to proceed");
        for selector in PROCEED_SELECTORS {
            match self.driver.count(selector).await {
                Ok(n) if n > 0 => {
                    match self.driver.click(selector).await {
                        Ok(()) => debug!(selector = %selector, "clicked through ssl warning"),
                        Err(err) => {
                            debug!(selector = %selector, error = %err, "proceed click failed");
                            continue;
                        }
                    }
                    return Some(true);
                }
                _ => continue,
            }
        }
        debug!("no proceed element on ssl warning page");
        Some(true)
    }

    async fn click(&self, step: &Step) -> Result<ActionOutput> {
        let selector = self.resolve_required(step).await?;

        for attempt in 1..=ENABLED_CHECK_ATTEMPTS {
            match self.driver.is_enabled(&selector).await {
                Ok(true) => break,
                Ok(false) if attempt < ENABLED_CHECK_ATTEMPTS => {
                    debug!(selector = %selector, attempt, "element not yet enabled");
                    sleep(ENABLED_CHECK_DELAY).await;
                }
                Ok(false) => bail!("Element never became enabled: {}", step.target),
                Err(err) => {
                    debug!(selector = %selector, error = %err, "enabled check failed");
                    break;
                }
            }
        }

        if let Err(err) = self.driver.scroll_into_view(&selector).await {
            debug!(selector = %selector, error = %err, "scroll into view failed");
        }

        if let Err(err) = self.driver.click(&selector).await {
            if !err.to_string().to_lowercase().contains("network") {
                return Err(err);
            }
            // Transient network hiccup mid-click gets one more try.
            warn!(selector = %selector, error = %err, "click hit network error, retrying once");
            sleep(ENABLED_CHECK_DELAY).await;
            self.driver.click(&selector).await?;
        }

        Ok(ActionOutput {
            message: format!("Clicked {}", step.target),
            ..Default::default()
        })
    }

    async fn fill(&self, step: &Step) -> Result<ActionOutput> {
        let selector = self.resolve_required(step).await?;

        if let Err(err) = self.driver.clear(&selector).await {
            debug!(selector = %selector, error = %err, "clear before fill failed");
        }
        self.driver.fill(&selector, &step.value).await?;

        let value_verified = match self.driver.read_value(&selector).await {
            Ok(read) => Some(read == step.value),
            Err(err) => {
                debug!(selector = %selector, error = %err, "fill readback failed");
                None
            }
        };

        // The value itself stays out of logs and outcomes; length only.
        Ok(ActionOutput {
            message: format!("Filled {} ({} chars)", step.target, step.value.chars().count()),
            value_verified,
            ..Default::default()
        })
    }

    async fn select(&self, step: &Step) -> Result<ActionOutput> {
        let selector = self.resolve_required(step).await?;
        self.driver.select_option(&selector, &step.value).await?;
        Ok(ActionOutput {
            message: format!("Selected '{}' in {}", step.value, step.target),
            ..Default::default()
        })
    }

    /// Element existence when the step has no expected text, otherwise a
    /// case-insensitive substring check over the page content.
    async fn verify(&self, step: &Step) -> Result<ActionOutput> {
        if step.value.trim().is_empty() {
            for attempt in 1..=VERIFY_ATTEMPTS {
                if resolver::resolve(self.driver.as_ref(), &step.target, step.locator_strategy)
                    .await
                    .is_some()
                {
                    return Ok(ActionOutput {
                        message: format!("Verified element present: {}", step.target),
                        ..Default::default()
                    });
                }
                if attempt < VERIFY_ATTEMPTS {
                    sleep(VERIFY_DELAY).await;
                }
            }
            bail!("Verification failed: element not found: {}", step.target);
        }

        let expected = step.value.to_lowercase();
        for attempt in 1..=VERIFY_ATTEMPTS {
            let content = self.driver.content().await?;
            if content.to_lowercase().contains(&expected) {
                return Ok(ActionOutput {
                    message: format!("Verified text present: '{}'", step.value),
                    ..Default::default()
                });
            }
            if attempt < VERIFY_ATTEMPTS {
                sleep(VERIFY_DELAY).await;
            }
        }
        bail!("Verification failed: text not found: '{}'", step.value);
    }

    /// `wait` with a "time"/"duration" target sleeps literally; anything
    /// else waits for the target element to become visible.
    async fn wait(&self, step: &Step) -> Result<ActionOutput> {
        let kind = step.target.trim().to_lowercase();
        if kind == "time" || kind == "duration" {
            let secs = step.value.trim().parse::<f64>().unwrap_or(1.0).max(0.0);
            sleep(Duration::from_secs_f64(secs)).await;
            return Ok(ActionOutput {
                message: format!("Waited {secs}s"),
                ..Default::default()
            });
        }

        let mut last_error = anyhow!("Element not found: {}", step.target);
        for attempt in 1..=WAIT_ATTEMPTS {
            if let Some(selector) =
                resolver::resolve(self.driver.as_ref(), &step.target, step.locator_strategy).await
            {
                match self.driver.wait_visible(&selector, WAIT_VISIBLE_TIMEOUT).await {
                    Ok(()) => {
                        return Ok(ActionOutput {
                            message: format!("Element visible: {}", step.target),
                            ..Default::default()
                        });
                    }
                    Err(err) => last_error = err,
                }
            }
            if attempt < WAIT_ATTEMPTS {
                sleep(WAIT_DELAY).await;
            }
        }
        Err(last_error.context(format!("Wait failed for: {}", step.target)))
    }

    async fn resolve_required(&self, step: &Step) -> Result<String> {
        resolver::resolve(self.driver.as_ref(), &step.target, step.locator_strategy)
            .await
            .ok_or_else(|| anyhow!("Element not found: {}", step.target))
    }
}

fn normalize_url(target: &str) -> String {
    let trimmed = target.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedDriver {
        present: HashSet<String>,
        content: String,
        goto_errors: Mutex<VecDeque<String>>,
        click_errors: Mutex<VecDeque<String>>,
        enabled_denials: AtomicUsize,
        goto_calls: AtomicUsize,
        click_calls: AtomicUsize,
        filled: Mutex<HashMap<String, String>>,
        relaxed_gotos: AtomicUsize,
    }

    impl ScriptedDriver {
        fn with_elements(selectors: &[&str]) -> Self {
            Self {
                present: selectors.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn queue_goto_error(&self, message: &str) {
            self.goto_errors.lock().unwrap().push_back(message.to_string());
        }

        fn queue_click_error(&self, message: &str) {
            self.click_errors.lock().unwrap().push_back(message.to_string());
        }
    }

    #[async_trait]
    impl PageDriver for ScriptedDriver {
        async fn goto(&self, _url: &str, wait: WaitUntil, _t: Duration) -> Result<()> {
            self.goto_calls.fetch_add(1, Ordering::Relaxed);
            if wait == WaitUntil::Commit {
                self.relaxed_gotos.fetch_add(1, Ordering::Relaxed);
            }
            if let Some(message) = self.goto_errors.lock().unwrap().pop_front() {
                bail!("{message}");
            }
            Ok(())
        }
        async fn count(&self, selector: &str) -> Result<u64> {
            Ok(u64::from(self.present.contains(selector)))
        }
        async fn wait_visible(&self, selector: &str, _t: Duration) -> Result<()> {
            if self.present.contains(selector) {
                Ok(())
            } else {
                bail!("Timeout waiting for {selector}")
            }
        }
        async fn scroll_into_view(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn click(&self, _selector: &str) -> Result<()> {
            self.click_calls.fetch_add(1, Ordering::Relaxed);
            if let Some(message) = self.click_errors.lock().unwrap().pop_front() {
                bail!("{message}");
            }
            Ok(())
        }
        async fn is_enabled(&self, _selector: &str) -> Result<bool> {
            let remaining = self.enabled_denials.load(Ordering::Relaxed);
            if remaining > 0 {
                self.enabled_denials.store(remaining - 1, Ordering::Relaxed);
                Ok(false)
            } else {
                Ok(true)
            }
        }
        async fn clear(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn fill(&self, selector: &str, value: &str) -> Result<()> {
            self.filled
                .lock()
                .unwrap()
                .insert(selector.to_string(), value.to_string());
            Ok(())
        }
        async fn read_value(&self, selector: &str) -> Result<String> {
            Ok(self
                .filled
                .lock()
                .unwrap()
                .get(selector)
                .cloned()
                .unwrap_or_default())
        }
        async fn select_option(&self, _selector: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn content(&self) -> Result<String> {
            Ok(self.content.clone())
        }
        async fn current_url(&self) -> Result<String> {
            Ok("https://example.test/".to_string())
        }
        async fn title(&self) -> Result<String> {
            Ok("Example".to_string())
        }
        async fn screenshot(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn executor(driver: ScriptedDriver) -> (ActionExecutor, Arc<ScriptedDriver>) {
        let driver = Arc::new(driver);
        (ActionExecutor::new(driver.clone()), driver)
    }

    #[tokio::test]
    async fn unknown_action_fails_without_touching_browser() {
        let (executor, driver) = executor(ScriptedDriver::default());
        let mut step = Step::click("anything");
        step.action = "hover".to_string();

        let report = executor.execute_step(&step).await;
        assert_eq!(report.status, StepStatus::Failed);
        assert_eq!(report.message, "Unknown action: hover");
        assert_eq!(driver.goto_calls.load(Ordering::Relaxed), 0);
        assert_eq!(driver.click_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn navigate_retries_with_relaxed_wait_after_ssl_error() {
        let driver = ScriptedDriver::default();
        driver.queue_goto_error("net::ERR_CERT_AUTHORITY_INVALID");
        let (executor, driver) = executor(driver);

        let report = executor.execute_step(&Step::navigate("example.test")).await;
        assert_eq!(report.status, StepStatus::Success);
        assert_eq!(report.message, "Navigated to https://example.test");
        assert_eq!(driver.goto_calls.load(Ordering::Relaxed), 2);
        assert_eq!(driver.relaxed_gotos.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn navigate_gives_up_after_relaxed_retry() {
        let driver = ScriptedDriver::default();
        driver.queue_goto_error("connection refused");
        driver.queue_goto_error("connection refused");
        let (executor, driver) = executor(driver);

        let report = executor.execute_step(&Step::navigate("https://down.test")).await;
        assert_eq!(report.status, StepStatus::Failed);
        assert!(report.message.contains("network error"), "{}", report.message);
        assert_eq!(driver.goto_calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn navigate_fails_immediately_on_unclassified_error() {
        let driver = ScriptedDriver::default();
        driver.queue_goto_error("browser crashed for an unrelated reason");
        let (executor, driver) = executor(driver);

        let report = executor.execute_step(&Step::navigate("https://up.test")).await;
        assert_eq!(report.status, StepStatus::Failed);
        assert!(report.message.contains("Navigation to"), "{}", report.message);
        assert_eq!(driver.goto_calls.load(Ordering::Relaxed), 1);
        assert_eq!(driver.relaxed_gotos.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn navigate_clicks_through_ssl_warning_page() {
        let mut driver = ScriptedDriver::with_elements(&["#proceed-link"]);
        driver.content = "<html>Your connection is not private</html>".to_string();
        let (executor, driver) = executor(driver);

        let report = executor.execute_step(&Step::navigate("self-signed.test")).await;
        assert_eq!(report.status, StepStatus::Success);
        assert_eq!(report.ssl_warning_handled, Some(true));
        assert_eq!(driver.click_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn navigate_marks_ssl_warning_handled_without_proceed_link() {
        let mut driver = ScriptedDriver::default();
        driver.content = "certificate error".to_string();
        let (executor, driver) = executor(driver);

        // The page came up despite the warning; that counts as handled even
        // though there is nothing to click through.
        let report = executor.execute_step(&Step::navigate("warn.test")).await;
        assert_eq!(report.status, StepStatus::Success);
        assert_eq!(report.ssl_warning_handled, Some(true));
        assert_eq!(driver.click_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn click_waits_for_element_to_become_enabled() {
        let driver = ScriptedDriver::with_elements(&["button:has-text('Save')"]);
        driver.enabled_denials.store(2, Ordering::Relaxed);
        let (executor, driver) = executor(driver);

        let report = executor.execute_step(&Step::click("Save button")).await;
        assert_eq!(report.status, StepStatus::Success);
        assert_eq!(driver.click_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn click_retries_once_on_network_error() {
        let driver = ScriptedDriver::with_elements(&["button:has-text('Save')"]);
        driver.queue_click_error("network change detected");
        let (executor, driver) = executor(driver);

        let report = executor.execute_step(&Step::click("Save button")).await;
        assert_eq!(report.status, StepStatus::Success);
        assert_eq!(driver.click_calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn click_on_missing_element_fails() {
        let (executor, _) = executor(ScriptedDriver::default());

        let report = executor.execute_step(&Step::click("Ghost button")).await;
        assert_eq!(report.status, StepStatus::Failed);
        assert!(report.message.contains("Element not found"), "{}", report.message);
    }

    #[tokio::test]
    async fn fill_reports_length_only_and_verifies_readback() {
        let (executor, _) = executor(ScriptedDriver::with_elements(&["input[name='username']"]));

        let report = executor
            .execute_step(&Step::fill("username field", "secret42"))
            .await;
        assert_eq!(report.status, StepStatus::Success);
        assert_eq!(report.value_verified, Some(true));
        assert!(report.message.contains("(8 chars)"), "{}", report.message);
        assert!(!report.message.contains("secret42"), "{}", report.message);
    }

    #[tokio::test(start_paused = true)]
    async fn verify_matches_text_case_insensitively() {
        let mut driver = ScriptedDriver::default();
        driver.content = "<h1>Welcome Back</h1>".to_string();
        let (executor, _) = executor(driver);

        let report = executor
            .execute_step(&Step::verify("page", "welcome back"))
            .await;
        assert_eq!(report.status, StepStatus::Success);

        let report = executor
            .execute_step(&Step::verify("page", "goodbye"))
            .await;
        assert_eq!(report.status, StepStatus::Failed);
        assert!(report.message.contains("text not found"), "{}", report.message);
    }

    #[tokio::test(start_paused = true)]
    async fn verify_without_text_checks_element_presence() {
        let (executor, _) = executor(ScriptedDriver::with_elements(&["#dashboard"]));

        let mut step = Step::verify("dashboard", "");
        step.locator_strategy = webheal_models::LocatorStrategy::Id;
        let report = executor.execute_step(&step).await;
        assert_eq!(report.status, StepStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_with_time_target_sleeps_for_value_seconds() {
        let (executor, _) = executor(ScriptedDriver::default());

        let report = executor.execute_step(&Step::wait("time", "3")).await;
        assert_eq!(report.status, StepStatus::Success);
        assert_eq!(report.message, "Waited 3s");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_missing_element_fails_after_retries() {
        let (executor, _) = executor(ScriptedDriver::default());

        let report = executor.execute_step(&Step::wait("spinner", "")).await;
        assert_eq!(report.status, StepStatus::Failed);
        assert!(report.message.contains("Wait failed"), "{}", report.message);
    }

    #[test]
    fn url_normalization_adds_https_and_keeps_ports() {
        assert_eq!(normalize_url("example.test"), "https://example.test");
        assert_eq!(normalize_url("example.test:8443"), "https://example.test:8443");
        assert_eq!(normalize_url("http://plain.test"), "http://plain.test");
        assert_eq!(normalize_url(" https://padded.test "), "https://padded.test");
    }

    #[test]
    fn navigation_failures_classify_by_substring() {
        assert_eq!(
            NavFailure::classify("net::ERR_CERT_AUTHORITY_INVALID"),
            NavFailure::Ssl
        );
        assert_eq!(NavFailure::classify("connection refused"), NavFailure::Network);
        assert_eq!(NavFailure::classify("TLS handshake failed"), NavFailure::Ssl);
        assert_eq!(NavFailure::classify("weird failure"), NavFailure::Other);
    }
}
