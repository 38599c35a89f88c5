//! Session lifecycle: one id maps to at most one live browser page.

use crate::driver::PageDriver;
use crate::playwright::{BrowserConfig, PlaywrightPage, probe_runtime};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Session already active: {0}")]
    SessionExists(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Browser runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Driver error: {0}")]
    Driver(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Owns every live browser session, indexed by caller-chosen id.
pub struct SessionManager {
    config: BrowserConfig,
    artifacts_dir: PathBuf,
    sessions: RwLock<HashMap<String, Arc<PlaywrightPage>>>,
}

impl SessionManager {
    pub fn new(artifacts_dir: PathBuf, config: BrowserConfig) -> Result<Self> {
        std::fs::create_dir_all(&artifacts_dir).map_err(anyhow::Error::from)?;
        Ok(Self {
            config,
            artifacts_dir,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn artifacts_dir(&self) -> &PathBuf {
        &self.artifacts_dir
    }

    /// Launches a fresh browser page for `id`. Errors if the runtime is
    /// missing or the id already has a live session.
    pub async fn create_session(&self, id: &str) -> Result<Arc<dyn PageDriver>> {
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(id) {
                return Err(BrowserError::SessionExists(id.to_string()));
            }
        }

        let probe = probe_runtime().await?;
        if !probe.ready {
            return Err(BrowserError::RuntimeUnavailable(probe.notes.join("; ")));
        }

        let page = Arc::new(PlaywrightPage::launch(id, &self.config).await?);

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            // Lost the race to a concurrent create for the same id.
            page.shutdown().await;
            return Err(BrowserError::SessionExists(id.to_string()));
        }
        sessions.insert(id.to_string(), page.clone());
        info!(session_id = %id, "browser session created");

        Ok(page)
    }

    /// Shuts down the session for `id`. Idempotent; close failures are
    /// logged, never propagated.
    pub async fn close_session(&self, id: &str) {
        let page = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(id)
        };
        match page {
            Some(page) => {
                page.shutdown().await;
                info!(session_id = %id, "browser session closed");
            }
            None => {
                warn!(session_id = %id, "close requested for unknown session");
            }
        }
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Closes every live session.
    pub async fn cleanup(&self) {
        let ids = self.list_sessions().await;
        for id in ids {
            self.close_session(&id).await;
        }
    }
}
