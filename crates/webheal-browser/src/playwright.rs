//! Playwright-backed [`PageDriver`] implementation.
//!
//! Each session spawns one long-lived Node process running a small driver
//! script. Commands go in as one JSON object per stdin line; results come
//! back on stdout as marker-tagged JSON, so page state (cookies, navigation,
//! DOM) survives between steps.

use crate::driver::{PageDriver, WaitUntil};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

const RESULT_MARKER: &str = "__WEBHEAL_RESULT__=";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Browser-side options applied when the session's context is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    pub user_agent: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            locale: "en-US".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Availability report for the Node + Playwright runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeProbe {
    pub node_available: bool,
    pub node_version: Option<String>,
    pub playwright_package_available: bool,
    pub chromium_cache_detected: bool,
    pub ready: bool,
    pub notes: Vec<String>,
}

impl RuntimeProbe {
    fn empty() -> Self {
        Self {
            node_available: false,
            node_version: None,
            playwright_package_available: false,
            chromium_cache_detected: false,
            ready: false,
            notes: Vec::new(),
        }
    }
}

/// Checks whether the browser runtime can actually start before any session
/// is created.
pub async fn probe_runtime() -> Result<RuntimeProbe> {
    let mut probe = RuntimeProbe::empty();

    let node_probe = run_command_capture("node", &["--version".to_string()], 10).await;
    if let Ok(output) = node_probe
        && output.exit_code == 0
    {
        probe.node_available = true;
        probe.node_version = Some(output.stdout.trim().to_string());
    }

    if probe.node_available {
        let playwright_probe = run_command_capture(
            "node",
            &[
                "--input-type=module".to_string(),
                "-e".to_string(),
                "import('playwright').then(() => process.exit(0)).catch(() => process.exit(1));"
                    .to_string(),
            ],
            15,
        )
        .await;
        probe.playwright_package_available = playwright_probe
            .map(|output| output.exit_code == 0)
            .unwrap_or(false);
    }

    probe.chromium_cache_detected = detect_chromium_cache();
    probe.ready = probe.node_available && probe.playwright_package_available;

    if !probe.node_available {
        probe
            .notes
            .push("Node.js not found. Install Node.js 20+ to enable browser execution.".to_string());
    }
    if probe.node_available && !probe.playwright_package_available {
        probe
            .notes
            .push("Playwright npm package not found. Run: npm i -D playwright".to_string());
    }
    if probe.ready && !probe.chromium_cache_detected {
        probe.notes.push(
            "Chromium binary not found in Playwright cache. Run: npx playwright install chromium"
                .to_string(),
        );
    }

    Ok(probe)
}

struct DriverChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

/// A live page backed by a persistent Node + Playwright child process.
pub struct PlaywrightPage {
    session_id: String,
    channel: Mutex<DriverChannel>,
    // Keeps the generated driver script alive for the child's lifetime.
    _script_dir: TempDir,
}

impl PlaywrightPage {
    /// Spawns the driver process, launches Chromium and waits for the ready
    /// handshake.
    pub async fn launch(session_id: &str, config: &BrowserConfig) -> Result<Self> {
        let script_dir = tempfile::Builder::new()
            .prefix("webheal-driver-")
            .tempdir()?;
        let script_path = script_dir.path().join("driver.mjs");
        std::fs::write(&script_path, build_driver_script(session_id, config)?)?;

        let mut child = Command::new("node")
            .arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn node for browser driver")?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Driver stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Driver stdout unavailable"))?;
        if let Some(stderr) = child.stderr.take() {
            let id = session_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(session_id = %id, line = %line, "browser driver stderr");
                }
            });
        }

        let page = Self {
            session_id: session_id.to_string(),
            channel: Mutex::new(DriverChannel {
                child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
                next_id: 0,
            }),
            _script_dir: script_dir,
        };

        let ready = page.command("ready", json!({}), STARTUP_TIMEOUT).await?;
        if ready.as_str() != Some("ready") {
            bail!("Browser driver startup handshake failed: {ready}");
        }
        debug!(session_id = %page.session_id, "browser driver started");
        Ok(page)
    }

    /// Closes the browser and reaps the child. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Err(err) = self
            .command("close", json!({}), Duration::from_secs(10))
            .await
        {
            debug!(session_id = %self.session_id, error = %err, "driver close command failed");
        }
        let mut channel = self.channel.lock().await;
        if let Err(err) = channel.child.kill().await {
            debug!(session_id = %self.session_id, error = %err, "driver kill failed");
        }
    }

    async fn command(&self, op: &str, args: Value, limit: Duration) -> Result<Value> {
        let mut channel = self.channel.lock().await;
        channel.next_id += 1;
        let id = channel.next_id;

        let mut line = serde_json::to_string(&json!({ "id": id, "op": op, "args": args }))?;
        line.push('\n');
        channel.stdin.write_all(line.as_bytes()).await?;
        channel.stdin.flush().await?;

        let reply = timeout(limit, read_reply(&mut channel.stdout, id)).await;
        match reply {
            Ok(result) => result,
            Err(_) => {
                warn!(session_id = %self.session_id, op = %op, "driver command timed out");
                bail!("timeout: driver {op} command did not complete")
            }
        }
    }
}

async fn read_reply(lines: &mut Lines<BufReader<ChildStdout>>, id: u64) -> Result<Value> {
    loop {
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| anyhow!("Browser driver exited unexpectedly"))?;
        let Some(rest) = line.strip_prefix(RESULT_MARKER) else {
            continue;
        };
        let reply: Value = serde_json::from_str(rest.trim())
            .with_context(|| format!("Malformed driver reply: {rest}"))?;
        if reply.get("id").and_then(Value::as_u64) != Some(id) {
            // A stale reply from a timed-out predecessor; skip it.
            continue;
        }
        if reply.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
        let message = reply
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown driver error");
        bail!("{message}");
    }
}

#[async_trait]
impl PageDriver for PlaywrightPage {
    async fn goto(&self, url: &str, wait_until: WaitUntil, limit: Duration) -> Result<()> {
        self.command(
            "goto",
            json!({
                "url": url,
                "wait_until": wait_until.as_str(),
                "timeout_ms": limit.as_millis() as u64,
            }),
            limit + Duration::from_secs(5),
        )
        .await?;
        Ok(())
    }

    async fn count(&self, selector: &str) -> Result<u64> {
        let value = self
            .command("count", json!({ "selector": selector }), DEFAULT_COMMAND_TIMEOUT)
            .await?;
        value
            .as_u64()
            .ok_or_else(|| anyhow!("count returned non-numeric value: {value}"))
    }

    async fn wait_visible(&self, selector: &str, limit: Duration) -> Result<()> {
        self.command(
            "wait_visible",
            json!({ "selector": selector, "timeout_ms": limit.as_millis() as u64 }),
            limit + Duration::from_secs(5),
        )
        .await?;
        Ok(())
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<()> {
        self.command(
            "scroll_into_view",
            json!({ "selector": selector }),
            DEFAULT_COMMAND_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.command("click", json!({ "selector": selector }), DEFAULT_COMMAND_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn is_enabled(&self, selector: &str) -> Result<bool> {
        let value = self
            .command("is_enabled", json!({ "selector": selector }), DEFAULT_COMMAND_TIMEOUT)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn clear(&self, selector: &str) -> Result<()> {
        self.command("clear", json!({ "selector": selector }), DEFAULT_COMMAND_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.command(
            "fill",
            json!({ "selector": selector, "value": value }),
            DEFAULT_COMMAND_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn read_value(&self, selector: &str) -> Result<String> {
        let value = self
            .command("read_value", json!({ "selector": selector }), DEFAULT_COMMAND_TIMEOUT)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
        self.command(
            "select_option",
            json!({ "selector": selector, "value": value }),
            DEFAULT_COMMAND_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        let value = self.command("content", json!({}), DEFAULT_COMMAND_TIMEOUT).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn current_url(&self) -> Result<String> {
        let value = self
            .command("current_url", json!({}), DEFAULT_COMMAND_TIMEOUT)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> Result<String> {
        let value = self.command("title", json!({}), DEFAULT_COMMAND_TIMEOUT).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.command(
            "screenshot",
            json!({ "path": path.display().to_string() }),
            DEFAULT_COMMAND_TIMEOUT,
        )
        .await?;
        Ok(())
    }
}

fn build_driver_script(session_id: &str, config: &BrowserConfig) -> Result<String> {
    let session_literal = serde_json::to_string(&json!({
        "id": session_id,
        "headless": config.headless,
        "viewport": { "width": config.viewport_width, "height": config.viewport_height },
        "locale": config.locale,
        "userAgent": config.user_agent,
    }))?;

    Ok(DRIVER_TEMPLATE.replace("__SESSION_JSON__", &session_literal))
}

const DRIVER_TEMPLATE: &str = r#"import readline from 'node:readline';

const RESULT_MARKER = '__WEBHEAL_RESULT__=';
const session = __SESSION_JSON__;

function reply(id, ok, value) {
  const body = ok ? { id, ok: true, result: value } : { id, ok: false, error: value };
  process.stdout.write(`${RESULT_MARKER}${JSON.stringify(body)}\n`);
}

let chromium;
try {
  ({ chromium } = await import('playwright'));
} catch (error) {
  const message = error && error.message ? error.message : String(error);
  process.stderr.write(message + '\n');
  reply(1, false, `playwright import failed: ${message}`);
  process.exit(1);
}

const browser = await chromium.launch({
  headless: session.headless,
  args: ['--no-sandbox', '--disable-dev-shm-usage', '--ignore-certificate-errors'],
});
const context = await browser.newContext({
  viewport: session.viewport,
  locale: session.locale,
  userAgent: session.userAgent,
  ignoreHTTPSErrors: true,
});
const page = await context.newPage();

async function shutdown() {
  await context.close().catch(() => {});
  await browser.close().catch(() => {});
}

async function dispatch(cmd) {
  const a = cmd.args ?? {};
  switch (cmd.op) {
    case 'ready':
      return 'ready';
    case 'goto': {
      await page.goto(a.url, { waitUntil: a.wait_until, timeout: a.timeout_ms });
      return null;
    }
    case 'count':
      return await page.locator(a.selector).count();
    case 'wait_visible':
      await page.locator(a.selector).first().waitFor({ state: 'visible', timeout: a.timeout_ms });
      return null;
    case 'scroll_into_view':
      await page.locator(a.selector).first().scrollIntoViewIfNeeded();
      return null;
    case 'click':
      await page.locator(a.selector).first().click();
      return null;
    case 'is_enabled':
      return await page.locator(a.selector).first().isEnabled();
    case 'clear':
      await page.locator(a.selector).first().fill('');
      return null;
    case 'fill':
      await page.locator(a.selector).first().fill(a.value);
      return null;
    case 'read_value':
      return await page.locator(a.selector).first().inputValue();
    case 'select_option':
      await page.locator(a.selector).first().selectOption(a.value);
      return null;
    case 'content':
      return await page.content();
    case 'current_url':
      return page.url();
    case 'title':
      return await page.title();
    case 'screenshot':
      await page.screenshot({ path: a.path });
      return null;
    case 'close':
      reply(cmd.id, true, null);
      await shutdown();
      process.exit(0);
    default:
      throw new Error(`Unsupported op: ${cmd.op}`);
  }
}

const rl = readline.createInterface({ input: process.stdin });
for await (const line of rl) {
  if (!line.trim()) continue;
  let cmd;
  try {
    cmd = JSON.parse(line);
  } catch {
    continue;
  }
  try {
    const result = await dispatch(cmd);
    reply(cmd.id, true, result);
  } catch (error) {
    reply(cmd.id, false, error && error.message ? error.message : String(error));
  }
}

await shutdown();
"#;

struct CommandCapture {
    exit_code: i32,
    stdout: String,
}

async fn run_command_capture(
    program: &str,
    args: &[String],
    timeout_secs: u64,
) -> Result<CommandCapture> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout(Duration::from_secs(timeout_secs), command.output()).await {
        Ok(result) => result?,
        Err(_) => bail!("Command timed out after {} seconds", timeout_secs),
    };

    Ok(CommandCapture {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
    })
}

fn detect_chromium_cache() -> bool {
    if let Ok(path) = std::env::var("PLAYWRIGHT_BROWSERS_PATH") {
        let parsed = PathBuf::from(path);
        if parsed.exists() {
            return true;
        }
    }

    let mut candidates = Vec::new();

    if let Ok(home) = std::env::var("HOME") {
        candidates.push(PathBuf::from(&home).join(".cache/ms-playwright"));
        candidates.push(PathBuf::from(&home).join("Library/Caches/ms-playwright"));
    }

    if let Ok(user_profile) = std::env::var("USERPROFILE") {
        candidates.push(PathBuf::from(user_profile).join("AppData/Local/ms-playwright"));
    }

    candidates.into_iter().any(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_script_embeds_session_options() {
        let config = BrowserConfig::default();
        let script = build_driver_script("sess_1", &config).unwrap();

        assert!(script.contains("\"id\":\"sess_1\""));
        assert!(script.contains("\"width\":1280"));
        assert!(script.contains("ignoreHTTPSErrors: true"));
        assert!(script.contains("--ignore-certificate-errors"));
        assert!(script.contains("case 'goto'"));
        assert!(script.contains("case 'select_option'"));
    }

    #[test]
    fn default_config_matches_context_options() {
        let config = BrowserConfig::default();
        assert!(config.headless);
        assert_eq!(config.viewport_width, 1280);
        assert_eq!(config.viewport_height, 720);
        assert_eq!(config.locale, "en-US");
    }
}
