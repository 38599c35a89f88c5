//! Engine collaborators, passed in explicitly rather than reached through
//! globals.

use crate::policy::RetryPolicy;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use webheal_ai::StepGenerator;
use webheal_browser::{PageDriver, ScreenshotRecorder, SessionManager};

/// Session creation seam. Production wraps [`SessionManager`]; tests hand
/// out scripted drivers.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, id: &str) -> Result<Arc<dyn PageDriver>>;

    /// Idempotent; never fails.
    async fn close(&self, id: &str);
}

pub struct BrowserSessionFactory {
    manager: Arc<SessionManager>,
}

impl BrowserSessionFactory {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl SessionFactory for BrowserSessionFactory {
    async fn create(&self, id: &str) -> Result<Arc<dyn PageDriver>> {
        Ok(self.manager.create_session(id).await?)
    }

    async fn close(&self, id: &str) {
        self.manager.close_session(id).await;
    }
}

/// Everything the engine needs to run a workflow.
pub struct EngineContext {
    pub sessions: Arc<dyn SessionFactory>,
    pub screenshots: Arc<ScreenshotRecorder>,
    pub generator: Arc<dyn StepGenerator>,
    pub policy: RetryPolicy,
}
