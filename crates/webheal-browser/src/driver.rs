//! The seam between step execution and the real browser.
//!
//! Everything above this trait (resolver, executor, engine) is tested against
//! scripted in-memory drivers; only [`crate::playwright::PlaywrightPage`]
//! talks to an actual browser.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Page-load wait states, in Playwright's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    DomContentLoaded,
    Load,
    Commit,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DomContentLoaded => "domcontentloaded",
            Self::Load => "load",
            Self::Commit => "commit",
        }
    }
}

/// One live browser page.
///
/// Errors carry the raw browser-layer message; the executor classifies
/// failures by substring (SSL vs network vs other), so implementations must
/// not rewrite error text.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<()>;

    /// Number of elements matching the selector right now.
    async fn count(&self, selector: &str) -> Result<u64>;

    async fn wait_visible(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn scroll_into_view(&self, selector: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn is_enabled(&self, selector: &str) -> Result<bool>;

    async fn clear(&self, selector: &str) -> Result<()>;

    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Current value of an input element, for fill verification.
    async fn read_value(&self, selector: &str) -> Result<String>;

    async fn select_option(&self, selector: &str, value: &str) -> Result<()>;

    /// Full page HTML.
    async fn content(&self) -> Result<String>;

    async fn current_url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    async fn screenshot(&self, path: &Path) -> Result<()>;
}
