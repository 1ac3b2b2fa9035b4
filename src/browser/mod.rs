pub mod behavior;
pub mod engine;
pub mod fingerprint;
pub mod session;

#[cfg(test)]
pub mod fake;

// Re-export common types
pub use engine::{BrowserError, BrowsingContext, BrowsingEngine, Page, PageElement};
pub use session::WebDriverEngine;
