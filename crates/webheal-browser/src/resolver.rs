//! Element resolution: turns a step target plus locator strategy into a
//! concrete selector the driver can act on.
//!
//! Resolution is a pure probe walk: for each candidate selector, ask the page
//! how many elements match and take the first hit. On an unchanged page the
//! same target always resolves to the same selector. Probe errors count as
//! misses; resolution itself never fails, it only returns `None`.

use crate::driver::PageDriver;
use tracing::debug;
use webheal_models::LocatorStrategy;

const USERNAME_HINTS: &[&str] = &["username", "user name", "email", "login id", "user id"];
const PASSWORD_HINTS: &[&str] = &["password", "passphrase"];
const LOGIN_HINTS: &[&str] = &["log in", "login", "sign in", "signin"];
const BUTTON_WORDS: &[&str] = &[
    "save", "submit", "add", "create", "next", "continue", "apply", "ok", "delete", "cancel",
];

const USERNAME_SELECTORS: &[&str] = &[
    "input[name='username']",
    "input[id='username']",
    "input[name='user']",
    "input[type='email']",
    "input[name='email']",
    "input[placeholder*='user' i]",
    "input[placeholder*='email' i]",
];

const PASSWORD_SELECTORS: &[&str] = &[
    "input[type='password']",
    "input[name='password']",
    "input[id='password']",
];

const LOGIN_BUTTON_SELECTORS: &[&str] = &[
    "button[type='submit']",
    "input[type='submit']",
    "button:has-text('Log In')",
    "button:has-text('Login')",
    "button:has-text('Sign In')",
    "[aria-label*='log in' i]",
];

/// Finds a selector for `target` using the requested strategy.
pub async fn resolve(
    driver: &dyn PageDriver,
    target: &str,
    strategy: LocatorStrategy,
) -> Option<String> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }

    match strategy {
        LocatorStrategy::Id => probe(driver, &format!("#{target}")).await,
        LocatorStrategy::Class => probe(driver, &format!(".{target}")).await,
        LocatorStrategy::Css => probe(driver, target).await,
        LocatorStrategy::Xpath => probe(driver, &format!("xpath={target}")).await,
        LocatorStrategy::Text => probe(driver, &format!("text=\"{}\"", escape(target))).await,
        LocatorStrategy::Auto => resolve_auto(driver, target).await,
    }
}

/// Ordered heuristic walk for targets described in plain language, e.g.
/// "username field" or "Save button".
async fn resolve_auto(driver: &dyn PageDriver, target: &str) -> Option<String> {
    for candidate in auto_candidates(target) {
        if let Some(selector) = probe(driver, &candidate).await {
            debug!(target = %target, selector = %selector, "element resolved");
            return Some(selector);
        }
    }
    debug!(target = %target, "element not resolved");
    None
}

fn auto_candidates(target: &str) -> Vec<String> {
    let lower = target.to_lowercase();
    let escaped = escape(target);
    let mut candidates: Vec<String> = Vec::new();

    if USERNAME_HINTS.iter().any(|hint| lower.contains(hint)) {
        candidates.extend(USERNAME_SELECTORS.iter().map(|s| s.to_string()));
    }
    if PASSWORD_HINTS.iter().any(|hint| lower.contains(hint)) {
        candidates.extend(PASSWORD_SELECTORS.iter().map(|s| s.to_string()));
    }
    if LOGIN_HINTS.iter().any(|hint| lower.contains(hint)) {
        candidates.extend(LOGIN_BUTTON_SELECTORS.iter().map(|s| s.to_string()));
    }
    if BUTTON_WORDS.iter().any(|word| lower.contains(word)) {
        // Strip a trailing "button" qualifier so "Save button" matches "Save".
        let label = target
            .trim_end_matches("button")
            .trim_end_matches("Button")
            .trim();
        let label = escape(label);
        candidates.push(format!("button:has-text('{label}')"));
        candidates.push(format!("input[type='button'][value*='{label}' i]"));
        candidates.push(format!("[role='button']:has-text('{label}')"));
    }

    // Literal matches: id / name first, then labelled attributes, then text.
    candidates.push(format!("#{escaped}"));
    candidates.push(format!("[name='{escaped}']"));
    candidates.push(format!("[aria-label*='{escaped}' i]"));
    candidates.push(format!("[placeholder*='{escaped}' i]"));
    candidates.push(format!("[title*='{escaped}' i]"));
    candidates.push(format!("text=\"{escaped}\""));
    candidates.push(format!("text={escaped}"));

    candidates
}

async fn probe(driver: &dyn PageDriver, selector: &str) -> Option<String> {
    match driver.count(selector).await {
        Ok(n) if n > 0 => Some(selector.to_string()),
        Ok(_) => None,
        Err(err) => {
            debug!(selector = %selector, error = %err, "selector probe failed");
            None
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'").replace('"', "\\\"")
}
