//! Self-healing workflow execution.
//!
//! [`engine::SelfHealingEngine`] drives a [`webheal_models::TestPlan`]
//! against a browser session with two levels of retry: bounded per-step
//! attempts, and full workflow attempts with LLM plan regeneration when
//! failures cluster. All bounds live in [`policy::RetryPolicy`]; all
//! collaborators arrive through [`context::EngineContext`].

pub mod context;
pub mod engine;
pub mod policy;

pub use context::{BrowserSessionFactory, EngineContext, SessionFactory};
pub use engine::SelfHealingEngine;
pub use policy::RetryPolicy;
