//! Browser runtime for webheal.
//!
//! This crate owns everything that touches a real browser:
//! - [`driver::PageDriver`], the seam the rest of the system is tested against
//! - [`playwright::PlaywrightPage`], the Node + Playwright implementation
//! - [`session::SessionManager`], id-keyed session lifecycle
//! - [`resolver`], plain-language element resolution
//! - [`executor::ActionExecutor`], the never-throws single-step boundary
//! - [`screenshot::ScreenshotRecorder`], best-effort capture

pub mod driver;
pub mod executor;
pub mod playwright;
pub mod resolver;
pub mod screenshot;
pub mod session;

pub use driver::{PageDriver, WaitUntil};
pub use executor::{ActionExecutor, StepReport};
pub use playwright::{BrowserConfig, PlaywrightPage, RuntimeProbe, probe_runtime};
pub use screenshot::ScreenshotRecorder;
pub use session::{BrowserError, SessionManager};
