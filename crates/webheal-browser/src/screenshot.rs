//! Best-effort screenshot capture.
//!
//! Capture failures never fail the calling step; they are logged and the
//! outcome simply carries no screenshot path.

use crate::driver::PageDriver;
use chrono::Utc;
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct ScreenshotRecorder {
    dir: PathBuf,
}

impl ScreenshotRecorder {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// `{session}_step_{nn}_{label}_{ts}.png`
    pub async fn capture(
        &self,
        driver: &dyn PageDriver,
        session_id: &str,
        step_number: usize,
        label: &str,
    ) -> Option<String> {
        let name = format!(
            "{session_id}_step_{step_number:02}_{}_{}.png",
            sanitize(label),
            Utc::now().timestamp()
        );
        self.write(driver, name).await
    }

    /// `{session}_error_{context}_{ts}.png`
    pub async fn capture_error(
        &self,
        driver: &dyn PageDriver,
        session_id: &str,
        context: &str,
    ) -> Option<String> {
        let name = format!(
            "{session_id}_error_{}_{}.png",
            sanitize(context),
            Utc::now().timestamp()
        );
        self.write(driver, name).await
    }

    async fn write(&self, driver: &dyn PageDriver, name: String) -> Option<String> {
        if let Err(err) = std::fs::create_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %err, "screenshot dir unavailable");
            return None;
        }
        let path = self.dir.join(name);
        match driver.screenshot(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "screenshot captured");
                Some(path.display().to_string())
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "screenshot failed");
                None
            }
        }
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::WaitUntil;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    struct StubDriver {
        fail: bool,
    }

    #[async_trait]
    impl PageDriver for StubDriver {
        async fn goto(&self, _url: &str, _wait: WaitUntil, _t: Duration) -> Result<()> {
            Ok(())
        }
        async fn count(&self, _selector: &str) -> Result<u64> {
            Ok(0)
        }
        async fn wait_visible(&self, _selector: &str, _t: Duration) -> Result<()> {
            Ok(())
        }
        async fn scroll_into_view(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn click(&self, _selector: &str) -> Result<()> {
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
            Ok(String::new())
        }
        async fn title(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn screenshot(&self, path: &Path) -> Result<()> {
            if self.fail {
                bail!("page crashed");
            }
            std::fs::write(path, b"png")?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn capture_writes_named_file() {
        let temp = tempdir().unwrap();
        let recorder = ScreenshotRecorder::new(temp.path().to_path_buf());
        let driver = StubDriver { fail: false };

        let path = recorder
            .capture(&driver, "run_attempt_1", 3, "before")
            .await
            .unwrap();
        assert!(path.contains("run_attempt_1_step_03_before_"));
        assert!(Path::new(&path).exists());
    }

    #[tokio::test]
    async fn capture_failure_returns_none() {
        let temp = tempdir().unwrap();
        let recorder = ScreenshotRecorder::new(temp.path().to_path_buf());
        let driver = StubDriver { fail: true };

        assert!(recorder.capture(&driver, "s", 1, "after").await.is_none());
        assert!(recorder.capture_error(&driver, "s", "click").await.is_none());
    }

    #[tokio::test]
    async fn error_capture_sanitizes_context() {
        let temp = tempdir().unwrap();
        let recorder = ScreenshotRecorder::new(temp.path().to_path_buf());
        let driver = StubDriver { fail: false };

        let path = recorder
            .capture_error(&driver, "s1", "step 2/click!")
            .await
            .unwrap();
        assert!(path.contains("s1_error_step_2_click__"));
    }
}
